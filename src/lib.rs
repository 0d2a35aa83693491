//! The shared core of the YouTube Data API command-line samples: OAuth2
//! authorization with persistent token caching, and a lazy fetcher for
//! paginated listing endpoints.
//!
//! For your application to use this library, you will have to obtain an
//! application id and secret by
//! [following this guide](https://developers.google.com/youtube/registering_an_application)
//! and downloading the resulting `client_secrets.json`.
//!
//! # Authorization
//! The [`Authenticator`] keeps a token per storage key (typically the name
//! of the invoking tool). A cached token is reused as long as it has not
//! expired and was issued for a superset of the requested scopes; an
//! expired one is refreshed silently. Only when neither works does the
//! interactive consent flow run: the user is shown an authorization URL
//! (or a local redirect listener captures the callback, see
//! [`ReturnMethod`]), and the granted code is exchanged for a fresh token,
//! which is persisted for the next run.
//!
//! # Pagination
//! Listing endpoints hand out results one page at a time together with an
//! opaque continuation token. [`ListRequest`] and [`fetch_all`] drain such
//! an endpoint into a plain iterator, requesting the next page lazily as
//! items are consumed.
//!
//! Everything is synchronous and blocking; the only long wait is the
//! consent flow itself, which can be bounded with
//! [`AuthenticatorBuilder::consent_timeout`].
//!
//! ```no_run
//! use tubekit::{Authenticator, DiskStorage, ListRequest, scopes};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let secret = tubekit::read_application_secret("client_secrets.json")?;
//!     let auth = Authenticator::builder(secret)
//!         .storage(DiskStorage::new(".tokens")?)
//!         .build()?;
//!
//!     // Engages the consent flow at most on the first run.
//!     let transport = auth.authorize(&[scopes::YOUTUBE_READONLY], "my-uploads")?;
//!
//!     let request = ListRequest::new(&transport, "https://www.googleapis.com/youtube/v3/playlistItems")
//!         .param("part", "snippet")
//!         .param("playlistId", "UUxxxxxxxxxxxxxxxxxxxxxx");
//!     for item in request.items::<serde_json::Value>(50)? {
//!         let item = item?;
//!         println!("{} ({})", item["snippet"]["title"], item["snippet"]["resourceId"]["videoId"]);
//!     }
//!     Ok(())
//! }
//! ```
#![deny(missing_docs)]

pub mod authenticator;
pub mod error;
mod helper;
pub mod installed;
mod pagination;
mod refresh;

/// Interface for storing tokens so that they can be re-used. There are
/// built-in memory and file-based storage providers. You can implement
/// your own by implementing the TokenStorage trait.
pub mod storage;

mod types;

#[doc(inline)]
pub use crate::authenticator::{Authenticator, AuthenticatorBuilder, AuthorizedTransport};
#[doc(inline)]
pub use crate::error::{AuthError, Error};
pub use crate::helper::{parse_application_secret, read_application_secret};
pub use crate::installed::{
    ConsentDelegate, ConsentOutcome, DefaultConsentDelegate, ReturnMethod,
};
pub use crate::pagination::{fetch_all, ListRequest, Page, PageIter, MAX_PAGE_SIZE};
pub use crate::storage::{DiskStorage, MemoryStorage, NullStorage, TokenStorage};
pub use crate::types::{scopes, ApplicationSecret, ConsoleApplicationSecret, Token};
