pub mod openai;
pub mod testing;
pub mod traits;
pub mod util;

pub use openai::OpenAiModel;
pub use traits::TextModel;
