//! # Cart Client
//!
//! Client side of the storefront cart: what a shopper's session runs.
//!
//! ## Layers
//!
//! - [`local`]: anonymous cart on the device, shared between tabs
//! - [`remote`]: signed-in cart on the server, behind [`CartApi`]
//! - [`catalog`]: "are these still on the menu", behind [`Validator`]
//! - [`engine`]: the [`CartEngine`] the UI talks to, choosing between the two stores
//!
//! ## Flow
//!
//! ```text
//! UI -> CartEngine -> LocalCartStore | CartApi
//!                  -> Validator
//! ```
//!
//! Auth state is handed to the engine as a [`tokio::sync::watch`] channel, so
//! the engine never reaches for a session singleton and tests can flip
//! sign-in by sending on the channel.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cart::{
//!     AuthState, CartEngine, EngineConfig, HttpCartApi, HttpValidator, LocalCartStore,
//!     local::FileStorage,
//! };
//! use tokio::sync::watch;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = Arc::new(FileStorage::new("profile")?);
//! let (auth, auth_rx) = watch::channel(AuthState::Unknown);
//!
//! let engine = CartEngine::new(
//!     EngineConfig::default(),
//!     LocalCartStore::new(storage),
//!     Arc::new(HttpCartApi::new("http://localhost:1111")),
//!     Arc::new(HttpValidator::new("http://localhost:1111")),
//!     auth_rx,
//! );
//! let _listeners = engine.spawn_listeners();
//!
//! auth.send(AuthState::Anonymous)?;
//! # Ok(())
//! # }
//! ```
pub mod catalog;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod local;
pub mod remote;

pub use catalog::{HttpValidator, Validator};
pub use engine::{ActiveCart, AuthState, CartEngine, CartEvent, EngineConfig, Listeners, Source};
pub use error::CartError;
pub use local::{LocalCart, LocalCartStore};
pub use remote::{CartApi, HttpCartApi, PatchOp};
