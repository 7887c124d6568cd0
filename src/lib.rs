#![warn(missing_docs, missing_debug_implementations)]

//! Check whether usernames are still available on third-party web
//! services.
//!
//! Usernames stream in, a bounded pool of worker threads checks each one
//! against a single chosen service, and classified results stream out.
//! Every determinate answer is recorded in an append-only cache file, so
//! re-running a list only pays for the usernames that were never
//! resolved (or whose entries have expired).
//!
//! The pieces compose explicitly: a [`services::Registry`] resolves a
//! service name to a [`check::Service`] capability, which a
//! [`pool::Pool`] drives against a [`cache::Cache`] implementation.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use handle_avail::cache::MemoryCache;
//! use handle_avail::check::Client;
//! use handle_avail::pool::Pool;
//! use handle_avail::services::Registry;
//!
//! let registry = Registry::builtin(Client::new());
//! let service = registry.get("github").expect("built-in service");
//!
//! let (pool, results) = Pool::spawn(service, Arc::new(MemoryCache::new()), 4);
//! pool.submit("octocat".to_string())?;
//! pool.shutdown();
//!
//! for result in results {
//!     println!("{}\t{}", result.username, result.status);
//! }
//! # Ok::<(), handle_avail::pool::SubmitError>(())
//! ```

pub mod cache;
pub mod check;
pub mod pool;
pub mod services;
