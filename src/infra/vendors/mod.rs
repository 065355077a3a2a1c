pub mod openai_client;
pub mod perspective_client;

pub use openai_client::OpenAiModerationClient;
pub use perspective_client::PerspectiveClient;
