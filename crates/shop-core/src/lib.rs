//! Onboarding, OAuth sign-in and passcode-gated login for the storefront app.
//!
//! [`flow::AppLaunchManager`] decides on start whether the user onboards or logs in.
//! Onboarding discovers [`connection::ConnectionParameters`], authorizes through
//! [`auth::OAuthSessionController`], fetches the server's passcode policy and
//! provisions the encrypted [`store::SecureStore`].

pub mod auth;
pub mod config;
pub mod connection;
pub mod flow;
pub mod persistence;
pub mod policy;
pub mod store;
