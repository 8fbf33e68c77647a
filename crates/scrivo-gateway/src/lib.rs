#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod provider;
pub mod storage;
pub mod transcript;

pub use error::{Error, Result};
pub use provider::{
    CallbackOutcome, DeepgramProvider, MockCallbackStyle, MockSttProvider, ProviderRegistry,
    SonioxProvider, SttProvider,
};
pub use storage::{InMemoryStorage, StorageGateway, StoredFile, SupabaseConfig, SupabaseStorage};
pub use transcript::extract_transcript;
