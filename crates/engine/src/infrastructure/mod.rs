//! Infrastructure Layer
//!
//! Protocol codecs and the async wiring to a real socket.

pub mod auth;
pub mod driver;

pub use auth::{
    AuthError, IdentifyResponse, IdentifyResult, TokenLifetime, decode_identify_response,
    encode_identify_request, parse_expires_in,
};
pub use driver::ConnectionDriver;
