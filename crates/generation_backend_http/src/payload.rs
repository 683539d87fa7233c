use generation_backend::ChatMessage;
use serde::Serialize;

/// Request body for `POST /chat/completions`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl ChatCompletionRequest {
    #[must_use]
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens,
            stream: true,
            temperature: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use generation_backend::ChatMessage;
    use serde_json::json;

    use super::ChatCompletionRequest;

    #[test]
    fn serializes_openai_shape_without_unset_temperature() {
        let request = ChatCompletionRequest::new(
            "m",
            vec![ChatMessage::system("rules"), ChatMessage::user("hi")],
            64,
        );
        let value = serde_json::to_value(&request).expect("request should serialize");
        assert_eq!(
            value,
            json!({
                "model": "m",
                "messages": [
                    { "role": "system", "content": "rules" },
                    { "role": "user", "content": "hi" }
                ],
                "max_tokens": 64,
                "stream": true
            })
        );
    }
}
