//! Voice assistant worker for media rooms, backed by DashScope
//! recognition, synthesis and Qwen completion.

pub mod assistant;
pub mod config;
