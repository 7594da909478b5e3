pub mod bus;

pub use bus::{pattern_matches, EventBus, Subscription};
