//! HTTP middleware for the ingress.

pub mod auth;
