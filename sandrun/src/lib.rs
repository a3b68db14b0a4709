//! Sandrun.

#[cfg(feature = "config")]
#[doc(inline)]
pub use sandrun_config as config;
#[cfg(feature = "config")]
#[doc(inline)]
pub use sandrun_config::Config;
#[cfg(feature = "docker")]
#[doc(inline)]
pub use sandrun_docker as docker;
#[cfg(feature = "engine")]
#[doc(inline)]
pub use sandrun_engine as engine;
#[cfg(feature = "engine")]
#[doc(inline)]
pub use sandrun_engine::Engine;
#[cfg(feature = "events")]
#[doc(inline)]
pub use sandrun_events as events;
#[cfg(feature = "languages")]
#[doc(inline)]
pub use sandrun_languages as languages;
