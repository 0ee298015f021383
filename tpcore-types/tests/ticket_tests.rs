use chrono::{Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use tpcore_types::{AuthMode, Credential, Protocol, SessionId, SessionTicket, SysType};

fn sample_ticket() -> SessionTicket {
    SessionTicket {
        id: SessionId::parse("sid-123").unwrap(),
        account_name: "root".into(),
        host_ip: "10.0.0.5".into(),
        host_port: 22,
        protocol: Protocol::Ssh,
        auth_mode: AuthMode::Password,
        sys_type: SysType::Linux,
        user_name: "alice".into(),
        user_auth: Credential::new("hunter2"),
        user_param: "{\"term\":\"xterm\"}".into(),
        auth_id: 42,
        ref_count: 0,
        ticket_start: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
    }
}

// ── Credential ────────────────────────────────────────────────────

#[test]
fn credential_debug_is_redacted() {
    let cred = Credential::new("hunter2");
    assert_eq!(format!("{:?}", cred), "Credential(***)");
    assert_eq!(cred.expose(), "hunter2");
}

#[test]
fn ticket_debug_never_contains_secret() {
    let dbg = format!("{:?}", sample_ticket());
    assert!(!dbg.contains("hunter2"));
    assert!(dbg.contains("alice"));
}

// ── Protocol ──────────────────────────────────────────────────────

#[test]
fn protocol_from_section_suffix() {
    assert_eq!("ssh".parse::<Protocol>().unwrap(), Protocol::Ssh);
    assert_eq!("RDP".parse::<Protocol>().unwrap(), Protocol::Rdp);
    assert_eq!("telnet".parse::<Protocol>().unwrap(), Protocol::Telnet);
    assert_eq!("vnc".parse::<Protocol>().unwrap(), Protocol::Vnc);
    assert!("x11".parse::<Protocol>().is_err());
}

#[test]
fn protocol_display_matches_serde() {
    for p in Protocol::ALL {
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, format!("\"{}\"", p));
    }
}

#[test]
fn sys_type_unknown_maps_to_other() {
    let s: SysType = serde_json::from_str("\"solaris\"").unwrap();
    assert_eq!(s, SysType::Other);
}

#[test]
fn auth_mode_kebab_case() {
    let m: AuthMode = serde_json::from_str("\"private-key\"").unwrap();
    assert_eq!(m, AuthMode::PrivateKey);
}

// ── SessionTicket ─────────────────────────────────────────────────

#[test]
fn ticket_serde_roundtrip() {
    let t = sample_ticket();
    let json = serde_json::to_string(&t).unwrap();
    let parsed: SessionTicket = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, t);
}

#[test]
fn ticket_age_clamps_future_start() {
    let t = sample_ticket();
    let before = t.ticket_start - Duration::seconds(10);
    assert_eq!(t.age(before), Duration::zero());
    let after = t.ticket_start + Duration::seconds(10);
    assert_eq!(t.age(after), Duration::seconds(10));
}

#[test]
fn ticket_target() {
    assert_eq!(sample_ticket().target(), "10.0.0.5:22");
}

proptest! {
    #[test]
    fn clone_is_independent(name in "[a-z]{1,16}", port in 1u16..) {
        let original = sample_ticket();
        let mut copy = original.clone();
        copy.account_name = name;
        copy.host_port = port;
        copy.ref_count += 1;
        prop_assert_eq!(original.account_name.as_str(), "root");
        prop_assert_eq!(original.host_port, 22);
        prop_assert_eq!(original.ref_count, 0);
    }
}
