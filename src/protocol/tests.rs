//! Protocol Module Tests
//!
//! Pins down the wire shape of the envelope (`{result, type, data}` JSON
//! text), the tagged decoding of each message union, and the coordinator
//! command grammar.

#[cfg(test)]
mod tests {
    use crate::ingestion::Record;
    use crate::protocol::command::CommandError;
    use crate::protocol::{
        Command, ControlMessage, Envelope, JoinState, Outcome, QueryMessage, QueryRequest, Relink,
        Reply, TopologyDescriptor,
    };

    fn descriptor(username: &str, ring_id: usize) -> TopologyDescriptor {
        TopologyDescriptor {
            n: 3,
            ring_id,
            username: username.to_string(),
            ip: "127.0.0.1".parse().unwrap(),
            accept_port: 4310 + ring_id as u16 * 10,
            query_port: 4311 + ring_id as u16 * 10,
        }
    }

    #[test]
    fn test_envelope_wire_shape() {
        let envelope = Envelope::success(ControlMessage::ResetId(7));
        let text = serde_json::to_string(&envelope).unwrap();

        assert!(text.contains("\"result\":\"SUCCESS\""));
        assert!(text.contains("\"type\":\"reset-id\""));
        assert!(text.contains("\"data\":7"));
    }

    #[test]
    fn test_failure_marker_on_the_wire() {
        let envelope = Envelope::<QueryMessage>::failure(QueryMessage::QueryResult(None));
        let text = serde_json::to_string(&envelope).unwrap();

        assert!(text.contains("\"result\":\"FAILURE\""));
        assert!(text.contains("\"type\":\"query-result\""));
    }

    #[test]
    fn test_control_message_tags_are_kebab_case() {
        let cases: Vec<(ControlMessage, &str)> = vec![
            (ControlMessage::LeavingTeardown, "leaving-teardown"),
            (ControlMessage::ResetId(0), "reset-id"),
            (ControlMessage::ResetComplete, "reset-complete"),
            (
                ControlMessage::RebuildDht("127.0.0.1:4310".parse().unwrap()),
                "rebuild-dht",
            ),
            (ControlMessage::DhtRebuilt, "dht-rebuilt"),
            (ControlMessage::Teardown, "teardown"),
            (ControlMessage::CheckNodes, "check-nodes"),
        ];

        for (message, tag) in cases {
            let text = serde_json::to_string(&Envelope::success(message)).unwrap();
            assert!(
                text.contains(&format!("\"type\":\"{}\"", tag)),
                "expected tag `{}` in {}",
                tag,
                text
            );
        }
    }

    #[test]
    fn test_record_message_round_trip() {
        let mut record = Record::new("Aruba");
        record
            .fields
            .insert("Country Code".to_string(), "ABW".to_string());

        let envelope = Envelope::success(ControlMessage::Record(record.clone()));
        let text = serde_json::to_string(&envelope).unwrap();
        let decoded: Envelope<ControlMessage> = serde_json::from_str(&text).unwrap();

        assert_eq!(decoded.message, ControlMessage::Record(record));
    }

    #[test]
    fn test_join_state_round_trip_with_and_without_prev() {
        let mut state = JoinState {
            username: "dave".to_string(),
            n: 0,
            addr: "127.0.0.1:4340".parse().unwrap(),
            query: "127.0.0.1:4341".parse().unwrap(),
            prev: None,
        };

        let text = serde_json::to_string(&Envelope::success(ControlMessage::ResetN(state.clone()))).unwrap();
        let decoded: Envelope<ControlMessage> = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded.message, ControlMessage::ResetN(state.clone()));

        state.prev = Some("127.0.0.1:4330".parse().unwrap());
        let text = serde_json::to_string(&Envelope::success(ControlMessage::ResetN(state.clone()))).unwrap();
        let decoded: Envelope<ControlMessage> = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded.message, ControlMessage::ResetN(state));
    }

    #[test]
    fn test_relink_round_trip() {
        let relink = Relink {
            current: "127.0.0.1:4320".parse().unwrap(),
            new: "127.0.0.1:4330".parse().unwrap(),
            query: "127.0.0.1:4331".parse().unwrap(),
        };
        let text = serde_json::to_string(&Envelope::success(ControlMessage::ResetLeft(relink))).unwrap();
        assert!(text.contains("\"type\":\"reset-left\""));

        let decoded: Envelope<ControlMessage> = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded.message, ControlMessage::ResetLeft(relink));
    }

    #[test]
    fn test_query_carries_origin_unchanged() {
        let request = QueryRequest {
            key: "Islamic State of Afghanistan".to_string(),
            origin: "127.0.0.1:4999".parse().unwrap(),
        };
        let text = serde_json::to_string(&Envelope::success(QueryMessage::Query(request.clone()))).unwrap();
        let decoded: Envelope<QueryMessage> = serde_json::from_str(&text).unwrap();

        assert_eq!(decoded.message, QueryMessage::Query(request));
    }

    #[test]
    fn test_topology_reply_round_trip() {
        let reply = Reply::Topology(vec![
            descriptor("alice", 0),
            descriptor("bob", 1),
            descriptor("carol", 2),
        ]);
        let text = serde_json::to_string(&Envelope::success(reply.clone())).unwrap();
        assert!(text.contains("\"type\":\"topology\""));

        let decoded: Envelope<Reply> = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded.result, Outcome::Success);
        assert_eq!(decoded.message, reply);
    }

    #[test]
    fn test_descriptor_addresses() {
        let descriptor = descriptor("bob", 1);
        assert_eq!(descriptor.accept_addr().to_string(), "127.0.0.1:4320");
        assert_eq!(descriptor.query_addr().to_string(), "127.0.0.1:4321");
    }

    #[test]
    fn test_parse_register() {
        let command = Command::parse("register alice 127.0.0.1 4310 4311").unwrap();
        assert_eq!(
            command,
            Command::Register {
                username: "alice".to_string(),
                ip: "127.0.0.1".parse().unwrap(),
                accept_port: 4310,
                query_port: 4311,
            }
        );
    }

    #[test]
    fn test_parse_setup_and_rebuilt_variants() {
        assert_eq!(
            Command::parse("setup-dht 3 alice").unwrap(),
            Command::SetupDht {
                n: 3,
                leader: "alice".to_string()
            }
        );
        assert_eq!(
            Command::parse("dht-rebuilt bob").unwrap(),
            Command::DhtRebuilt {
                username: "bob".to_string(),
                new_leader: None
            }
        );
        assert_eq!(
            Command::parse("dht-rebuilt bob carol").unwrap(),
            Command::DhtRebuilt {
                username: "bob".to_string(),
                new_leader: Some("carol".to_string())
            }
        );
    }

    #[test]
    fn test_parse_rejects_bad_arity() {
        assert!(matches!(
            Command::parse("register alice 127.0.0.1 4310"),
            Err(CommandError::Arity { .. })
        ));
        assert!(matches!(
            Command::parse("setup-dht"),
            Err(CommandError::Arity { .. })
        ));
        assert!(matches!(
            Command::parse("dht-rebuilt"),
            Err(CommandError::Arity { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_bad_values_and_unknown_commands() {
        assert!(matches!(
            Command::parse("register alice nowhere 4310 4311"),
            Err(CommandError::BadValue { .. })
        ));
        assert!(matches!(
            Command::parse("setup-dht three alice"),
            Err(CommandError::BadValue { .. })
        ));
        assert!(matches!(
            Command::parse("shutdown now"),
            Err(CommandError::Unknown(_))
        ));
        assert_eq!(Command::parse("   "), Err(CommandError::Empty));
    }

    #[test]
    fn test_display_commands_parse_bare() {
        assert_eq!(Command::parse("display-users").unwrap(), Command::DisplayUsers);
        assert_eq!(Command::parse("display-dht").unwrap(), Command::DisplayDht);
    }
}
