// Wire types for the socket channel and the REST pull path.
//   events -> ClientEvent / ServerEvent envelopes and inbound payloads
//   views  -> DTOs shared by events and REST responses

pub mod events;
pub mod views;

pub use events::{decode_client_frame, ClientEvent, ServerEvent};
