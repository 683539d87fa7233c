//! Terminal front end for the mlx-code assistant.
//!
//! ## Backend bootstrap
//!
//! - `MLX_CODE_BACKEND=mock` (default) streams canned replies offline
//! - `MLX_CODE_BACKEND=http` talks to an OpenAI-compatible local server
//!
//! The http backend reads `MLX_CODE_BASE_URL` (default
//! `http://127.0.0.1:8080/v1`), `MLX_CODE_MODEL`, and an optional
//! `MLX_CODE_API_KEY`.
//!
//! ## Session tuning
//!
//! `MLX_CODE_HOME` relocates logs, backups and autosave (default
//! `~/.mlx-code`). `MLX_CODE_CTX_CHARS`, `MLX_CODE_MAX_TOKENS` and
//! `MLX_CODE_AUTO_CONTEXT` override the history budget, generation length and
//! reference auto-loading; a `.mlx-code.json` in the project root may set the
//! same values. `MLX_CODE_LOG` is an `EnvFilter` directive for the log file.

pub mod app;
pub mod autosave;
pub mod commands;
pub mod console;
pub mod providers;
pub mod review;
