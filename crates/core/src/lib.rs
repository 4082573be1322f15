//! Core of the Maakima voice assistant: conversation state, the functions
//! the model may call, and the capability interfaces (language model,
//! speech, mail, room transport) a session is assembled from.

pub mod conversation;
pub mod email;
pub mod functions;
pub mod history;
pub mod llm_client;
pub mod room;
pub mod speech;
