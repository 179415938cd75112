pub mod tts;
pub mod workflow;
