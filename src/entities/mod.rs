// Entity Models
// Following Rich Hickey's philosophy: "Identity persists, values change"
//
// A category has a stable identity (UUID) and values (name, position,
// keywords) that the Rule Store changes over time.

pub mod category;

pub use category::{Category, Keyword};
