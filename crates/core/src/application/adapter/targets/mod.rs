// Supported targets

pub mod chatgpt;
pub mod deepseek;
pub mod doubao;
pub mod kimi;
pub mod perplexity;

pub use chatgpt::ChatGpt;
pub use deepseek::DeepSeek;
pub use doubao::Doubao;
pub use kimi::Kimi;
pub use perplexity::Perplexity;
