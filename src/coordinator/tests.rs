//! Coordinator Module Tests
//!
//! Exercises the registry state machine through the same text grammar the
//! wire uses: registration validation, ring construction, the busy gate, and
//! the join/leave/teardown lifecycle round trips.

#[cfg(test)]
mod tests {
    use crate::coordinator::registry::Registry;
    use crate::coordinator::types::{RegistryError, Role};
    use crate::protocol::{Command, Reply};

    const COORDINATOR_PORT: u16 = 5000;

    fn registry() -> Registry {
        Registry::new(COORDINATOR_PORT)
    }

    fn run(registry: &mut Registry, line: &str) -> Result<Reply, RegistryError> {
        registry.dispatch(Command::parse(line).expect("test command must parse"))
    }

    fn ok(registry: &mut Registry, line: &str) -> Reply {
        run(registry, line).unwrap_or_else(|error| panic!("`{}` failed: {}", line, error))
    }

    /// Three Free users a, b, c on distinct ports.
    fn populated() -> Registry {
        let mut registry = registry();
        ok(&mut registry, "register alice 127.0.0.1 4310 4311");
        ok(&mut registry, "register bob 127.0.0.1 4320 4321");
        ok(&mut registry, "register carol 127.0.0.1 4330 4331");
        registry
    }

    /// A stable 3-ring led by alice.
    fn stable_ring() -> Registry {
        let mut registry = populated();
        ok(&mut registry, "setup-dht 3 alice");
        ok(&mut registry, "dht-complete alice");
        registry
    }

    // ============================================================
    // REGISTRATION
    // ============================================================

    #[test]
    fn test_register_rejects_duplicate_username() {
        let mut registry = populated();
        let error = run(&mut registry, "register alice 127.0.0.1 4390 4391").unwrap_err();
        assert_eq!(error, RegistryError::UsernameTaken("alice".to_string()));
    }

    #[test]
    fn test_register_rejects_non_alphabetic_and_long_usernames() {
        let mut registry = registry();
        assert!(matches!(
            run(&mut registry, "register alice3 127.0.0.1 4310 4311"),
            Err(RegistryError::InvalidUsername(_))
        ));
        assert!(matches!(
            run(&mut registry, "register abcdefghijklmnop 127.0.0.1 4310 4311"),
            Err(RegistryError::InvalidUsername(_))
        ));
        // fifteen characters is still fine
        assert!(run(&mut registry, "register abcdefghijklmno 127.0.0.1 4310 4311").is_ok());
    }

    #[test]
    fn test_register_rejects_reserved_ports() {
        let mut registry = populated();
        // bob already holds 4320
        assert_eq!(
            run(&mut registry, "register dave 127.0.0.1 4320 4399").unwrap_err(),
            RegistryError::PortReserved(4320)
        );
        // the coordinator's own port is reserved as well
        assert_eq!(
            run(&mut registry, "register dave 127.0.0.1 5000 4399").unwrap_err(),
            RegistryError::PortReserved(COORDINATOR_PORT)
        );
    }

    #[test]
    fn test_deregister_frees_ports_and_requires_free_role() {
        let mut registry = populated();
        ok(&mut registry, "deregister carol");
        // carol's ports are free for someone else now
        ok(&mut registry, "register dave 127.0.0.1 4330 4331");

        ok(&mut registry, "setup-dht 2 alice");
        assert_eq!(ok(&mut registry, "dht-complete alice"), Reply::SetupComplete);
        assert!(matches!(
            run(&mut registry, "deregister alice"),
            Err(RegistryError::NotFree(_))
        ));
        assert!(matches!(
            run(&mut registry, "deregister nobody"),
            Err(RegistryError::UnknownUser(_))
        ));
    }

    // ============================================================
    // RING CONSTRUCTION
    // ============================================================

    #[test]
    fn test_setup_assigns_leader_position_zero_and_contiguous_ids() {
        let mut registry = populated();
        let Reply::Topology(descriptors) = ok(&mut registry, "setup-dht 3 bob") else {
            panic!("setup-dht must return the topology");
        };

        assert_eq!(descriptors.len(), 3);
        assert_eq!(descriptors[0].username, "bob");
        for (position, descriptor) in descriptors.iter().enumerate() {
            assert_eq!(descriptor.ring_id, position);
            assert_eq!(descriptor.n, 3);
        }
        // non-leaders fill in registration order
        assert_eq!(descriptors[1].username, "alice");
        assert_eq!(descriptors[2].username, "carol");

        assert_eq!(registry.role_of("bob"), Some(Role::Leader));
        assert_eq!(registry.role_of("alice"), Some(Role::InDht));
        assert_eq!(registry.role_of("carol"), Some(Role::InDht));
    }

    #[test]
    fn test_setup_rejects_bad_sizes_and_unknown_leader() {
        let mut registry = populated();
        assert!(matches!(
            run(&mut registry, "setup-dht 1 alice"),
            Err(RegistryError::RingSize { .. })
        ));
        assert!(matches!(
            run(&mut registry, "setup-dht 4 alice"),
            Err(RegistryError::RingSize { .. })
        ));
        assert!(matches!(
            run(&mut registry, "setup-dht 2 dave"),
            Err(RegistryError::UnknownUser(_))
        ));
    }

    #[test]
    fn test_second_setup_is_rejected() {
        let mut registry = stable_ring();
        assert_eq!(
            run(&mut registry, "setup-dht 2 alice").unwrap_err(),
            RegistryError::DhtExists
        );
    }

    #[test]
    fn test_busy_gate_during_creation() {
        let mut registry = populated();
        ok(&mut registry, "setup-dht 2 alice");

        assert!(matches!(
            run(&mut registry, "register dave 127.0.0.1 4390 4391"),
            Err(RegistryError::Busy(_))
        ));
        assert!(matches!(
            run(&mut registry, "query-dht carol"),
            Err(RegistryError::Busy(_))
        ));
        // only the completion command passes, and only from the leader
        assert!(matches!(
            run(&mut registry, "dht-complete bob"),
            Err(RegistryError::NotLeader(_))
        ));
        ok(&mut registry, "dht-complete alice");
        assert!(!registry.is_busy());
    }

    #[test]
    fn test_dht_complete_requires_a_creation_in_progress() {
        let mut registry = stable_ring();
        assert_eq!(
            run(&mut registry, "dht-complete alice").unwrap_err(),
            RegistryError::NotCreating
        );
    }

    // ============================================================
    // QUERY ENTRY POINTS
    // ============================================================

    #[test]
    fn test_query_dht_returns_a_ring_member_to_a_free_user() {
        let mut registry = stable_ring();
        ok(&mut registry, "register dave 127.0.0.1 4340 4341");

        for _ in 0..20 {
            let Reply::QueryNode(descriptor) = ok(&mut registry, "query-dht dave") else {
                panic!("query-dht must return an entry point");
            };
            assert!(["alice", "bob", "carol"].contains(&descriptor.username.as_str()));
            assert_eq!(descriptor.n, 3);
        }
    }

    #[test]
    fn test_query_dht_rejects_ring_members_and_unknown_users() {
        let mut registry = stable_ring();
        assert!(matches!(
            run(&mut registry, "query-dht bob"),
            Err(RegistryError::NotFree(_))
        ));
        assert!(matches!(
            run(&mut registry, "query-dht dave"),
            Err(RegistryError::UnknownUser(_))
        ));
    }

    // ============================================================
    // LEAVE / JOIN
    // ============================================================

    #[test]
    fn test_leave_then_rebuilt_promotes_the_new_leader() {
        let mut registry = stable_ring();
        ok(&mut registry, "leave-dht bob");
        assert!(registry.is_busy());

        // the ring reports completion: carol was bob's successor, so she
        // renumbered to position 0
        ok(&mut registry, "dht-rebuilt bob carol");

        assert_eq!(registry.role_of("carol"), Some(Role::Leader));
        assert_eq!(registry.role_of("alice"), Some(Role::InDht));
        assert_eq!(registry.role_of("bob"), Some(Role::Free));
        assert_eq!(registry.leader(), Some("carol"));
        assert_eq!(registry.ring(), ["carol".to_string(), "alice".to_string()]);
        assert!(!registry.is_busy());
    }

    #[test]
    fn test_leader_leave_keeps_exactly_one_leader() {
        let mut registry = stable_ring();
        ok(&mut registry, "leave-dht alice");
        ok(&mut registry, "dht-rebuilt alice bob");

        assert_eq!(registry.role_of("bob"), Some(Role::Leader));
        assert_eq!(registry.role_of("alice"), Some(Role::Free));
        assert_eq!(registry.ring().len(), 2);
    }

    #[test]
    fn test_rebuilt_validates_the_reporting_user() {
        let mut registry = stable_ring();
        ok(&mut registry, "leave-dht bob");

        assert!(matches!(
            run(&mut registry, "dht-rebuilt carol alice"),
            Err(RegistryError::PendingMismatch { .. })
        ));
        assert_eq!(
            run(&mut registry, "dht-rebuilt bob").unwrap_err(),
            RegistryError::MissingNewLeader
        );
        // the leaver itself cannot be the new leader
        assert!(matches!(
            run(&mut registry, "dht-rebuilt bob bob"),
            Err(RegistryError::NotInRing(_))
        ));
    }

    #[test]
    fn test_rebuilt_without_a_pending_change_fails() {
        let mut registry = stable_ring();
        assert_eq!(
            run(&mut registry, "dht-rebuilt alice").unwrap_err(),
            RegistryError::NothingPending
        );
    }

    #[test]
    fn test_join_then_rebuilt_extends_the_ring() {
        let mut registry = stable_ring();
        ok(&mut registry, "register dave 127.0.0.1 4340 4341");

        let Reply::JoinGrant(leader) = ok(&mut registry, "join-dht dave") else {
            panic!("join-dht must return the leader's addresses");
        };
        assert_eq!(leader.accept.to_string(), "127.0.0.1:4310");
        assert_eq!(leader.query.to_string(), "127.0.0.1:4311");
        assert!(registry.is_busy());

        // everything else is rejected while stabilizing
        assert!(matches!(
            run(&mut registry, "leave-dht bob"),
            Err(RegistryError::Busy(_))
        ));

        ok(&mut registry, "dht-rebuilt dave");
        assert_eq!(registry.role_of("dave"), Some(Role::InDht));
        assert_eq!(registry.ring().len(), 4);
        assert_eq!(registry.ring().last().map(String::as_str), Some("dave"));
    }

    #[test]
    fn test_join_requires_a_free_user_and_an_existing_dht() {
        let mut registry = populated();
        assert_eq!(
            run(&mut registry, "join-dht alice").unwrap_err(),
            RegistryError::NoDht
        );

        let mut registry = stable_ring();
        assert!(matches!(
            run(&mut registry, "join-dht bob"),
            Err(RegistryError::NotFree(_))
        ));
    }

    // ============================================================
    // TEARDOWN
    // ============================================================

    #[test]
    fn test_teardown_round_trip_leaves_a_clean_registry() {
        let mut registry = stable_ring();
        assert!(matches!(
            run(&mut registry, "teardown-dht bob"),
            Err(RegistryError::NotLeader(_))
        ));

        ok(&mut registry, "teardown-dht alice");
        assert!(matches!(
            run(&mut registry, "register dave 127.0.0.1 4390 4391"),
            Err(RegistryError::Busy(_))
        ));

        ok(&mut registry, "teardown-complete alice");
        for username in ["alice", "bob", "carol"] {
            assert_eq!(registry.role_of(username), Some(Role::Free));
        }
        assert!(registry.ring().is_empty());
        assert!(!registry.dht_exists());

        // a fresh setup works without leftover state
        ok(&mut registry, "setup-dht 3 carol");
        ok(&mut registry, "dht-complete carol");
        assert_eq!(registry.role_of("carol"), Some(Role::Leader));
    }

    #[test]
    fn test_teardown_complete_requires_progress_and_the_leader() {
        let mut registry = stable_ring();
        assert_eq!(
            run(&mut registry, "teardown-complete alice").unwrap_err(),
            RegistryError::NotTearingDown
        );

        ok(&mut registry, "teardown-dht alice");
        assert!(matches!(
            run(&mut registry, "teardown-complete bob"),
            Err(RegistryError::NotLeader(_))
        ));
    }

    #[test]
    fn test_display_listings() {
        let mut registry = populated();
        let Reply::Listing(users) = ok(&mut registry, "display-users") else {
            panic!("display-users must return a listing");
        };
        assert_eq!(users.len(), 3);
        assert!(users[0].starts_with("alice"));

        let Reply::Listing(ring) = ok(&mut registry, "display-dht") else {
            panic!("display-dht must return a listing");
        };
        assert_eq!(ring, vec!["no DHT exists".to_string()]);
    }
}
