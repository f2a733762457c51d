//! Authenticated endpoint discovery for applications operating in the
//! presence of network-level blocking.
//!
//! A small RSA-signed challenge/response protocol (`protocol`, `crypto`) lets
//! a client distinguish a genuine, authorized endpoint from anything a
//! network adversary could inject, without a pre-shared client secret. An
//! encrypted, ordered candidate list (`store`) tracks which endpoints have
//! worked before; a resolver (`resolver`) walks that list, probing `api`
//! entries and following `file` indirections (`list_parser`) until one
//! succeeds, applying any server-issued add/remove/navigate directives
//! (`dynamic_urls`) along the way.
//!
//! `platform` and `http` are the seams a host application can substitute:
//! secure storage, browser launching, and the HTTP transport itself are all
//! trait objects, with concrete defaults provided.

pub mod atoms;
pub mod config;
pub mod crypto;
pub mod dynamic_urls;
pub mod http;
pub mod list_parser;
pub mod model;
pub mod platform;
pub mod protocol;
pub mod resolver;
pub mod store;

pub use atoms::error::{PassGfwError, PassGfwResult};
pub use crypto::CryptoContext;
pub use http::{HttpResponse, HttpTransport, ReqwestHttpTransport};
pub use model::{CandidateEntry, EntryStats, EntryStatus, Method, StoreRecord};
pub use platform::{BrowserOpener, KeychainSecureStorage, SecureStorage, SystemBrowserOpener};
pub use protocol::ResolvedResult;
pub use resolver::{Resolver, ResolverConfig};
pub use store::CandidateStore;
