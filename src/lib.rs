// Library side of the chatroom client, shared by the binary and the tests
pub mod api;
pub mod config;
pub mod models;
pub mod realtime;
pub mod session;
pub mod state;

// Re-export main types for convenience
pub use api::{ApiClient, ApiError, ChatBackend, PageCursor};
pub use config::{ClientConfig, ConfigError};
pub use models::*;
pub use realtime::{InboundEvent, OutboundFrame, RealtimeClient};
pub use session::{ChatSession, SessionReply};
pub use state::{ChatState, Dispatch, DispatchContext};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echoed_text_frame_shows_as_outgoing() {
        let room = Chatroom::new(1, "general", &[(2, "bob")]);
        let mut state = ChatState::new();
        let ctx = DispatchContext { active: Some(&room), self_username: Some("admin") };

        let frame = r#"{"msg_type": 3, "random_id": -123, "text": "Hey", "sender": "1", "sender_username": "admin", "receiver": "1"}"#;
        let event = InboundEvent::parse(frame).unwrap();
        assert_eq!(state.apply(event, &ctx), Dispatch::MessageAppended { id: -123, chatroom: 1 });

        let visible: Vec<&Message> = state.messages_in(room.id).collect();
        assert_eq!(visible.len(), 1);
        assert!(visible[0].out);
        assert_eq!(visible[0].text, "Hey");
    }

    #[test]
    fn typing_pair_from_roster_member() {
        let room = Chatroom::new(1, "general", &[(2, "bob")]);
        let mut state = ChatState::new();
        let ctx = DispatchContext { active: Some(&room), self_username: Some("admin") };

        state.apply(InboundEvent::parse(r#"{"msg_type": 5, "user_pk": "2"}"#).unwrap(), &ctx);
        let typing: Vec<&TypingIndicator> = state.typing_in(1).collect();
        assert_eq!(typing.len(), 1);
        assert_eq!(typing[0].sender_username, "bob");

        state.apply(InboundEvent::parse(r#"{"msg_type": 10, "user_pk": "2"}"#).unwrap(), &ctx);
        assert_eq!(state.typing_in(1).count(), 0);
    }
}
