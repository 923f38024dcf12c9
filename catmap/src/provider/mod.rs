//! Tile source network access.
//!
//! The tile downloader talks to the network only through [`HttpClient`] so
//! tests can substitute a mock and never touch a real tile server.

mod http;

pub use http::{HttpClient, HttpError, HttpResponse, ReqwestClient};

#[cfg(test)]
pub use http::tests::MockHttpClient;
