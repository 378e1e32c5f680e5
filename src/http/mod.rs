//! HTTP/1.1 protocol handling for the server side of the proxy.
//!
//! - **`connection`**: per-connection state machine that emits server events
//! - **`parser`**: parses incoming HTTP requests from byte buffers
//! - **`request`**: HTTP request representation and header helpers
//! - **`response`**: HTTP response representation with builder pattern
//! - **`writer`**: serializes and writes HTTP responses to the client
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait for incoming request data
//!        └──────┬──────┘
//!               │ Request received
//!               ├─ Upgrade requested → Upgrading → socket handed off
//!               ▼
//!        ┌──────────────────┐
//!        │   Processing     │ ← Request event, wait on the responder
//!        └──────┬───────────┘
//!               │ Response ready
//!               ▼
//!        ┌──────────────────┐
//!        │    Writing       │ ← Send response to client
//!        └──────┬───────────┘
//!               │ Response sent
//!               ├─ Keep-Alive → Reading (same connection)
//!               └─ Close → Closed
//! ```

pub mod connection;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
