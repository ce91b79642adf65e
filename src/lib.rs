mod attribute_value;
mod combiners;
mod condition;
mod engine;
mod eval;
mod key;
mod matcher;
mod matchers;
mod maybe_async;
pub mod murmur3;
mod parser;
mod rule_based_segment;
mod sanitize;
mod semver;
mod split;
mod store;
mod test_common;
mod treatments;
mod util;

pub use attribute_value::*;
pub use combiners::*;
pub use condition::*;
pub use engine::*;
pub use eval::*;
pub use key::*;
pub use matcher::*;
pub use matchers::*;
pub use maybe_async::*;
pub use parser::*;
pub use rule_based_segment::*;
pub use sanitize::*;
pub use semver::*;
pub use split::*;
pub use store::*;
pub use treatments::*;
