//! Keeps host characteristics and remote zone factors in agreement.

pub mod binding;
pub mod channel;
pub mod debounce;
pub mod light;
pub mod poller;
pub mod window;

pub use binding::{BindingBuilder, CharacteristicBinding, Dependency};
pub use channel::{FactorChannel, READ_THROTTLE, SettingsSnapshot};
pub use debounce::{DEFAULT_DEBOUNCE, Debouncer};
pub use light::LightBulb;
pub use poller::{PollOptions, Poller};
pub use window::{WindowCovering, WindowCoveringOptions};
