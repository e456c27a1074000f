pub mod completion;
pub mod error;
pub mod providers;

pub use completion::{extract_json_block, parse_structured};
pub use error::ModelError;
pub use providers::{LanguageModel, ModelProvider, RigModel};
