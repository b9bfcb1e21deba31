//! Wire layout vectors for interoperability checks
//!
//! Built from fixed seeds so that other implementations can reproduce the
//! exact bytes.

use crate::crypto::*;
use crate::protocol::{Ping, Pong, Protocol};
use crate::types::*;
use crate::wire;
use serde::Serialize;
use std::net::SocketAddr;

/// Test vector output format (JSON serializable)
#[derive(Serialize)]
pub struct TestVector {
    pub name: String,
    pub description: String,
    pub inputs: serde_json::Value,
    pub wire_bytes_hex: String,
    pub hash_hex: String,
}

pub fn generate_test_vectors() -> Vec<TestVector> {
    vec![contact_info_vector(), ping_vector(), pong_vector(), prune_sign_bytes_vector()]
}

fn keypair(seed: u8) -> KeyPair {
    KeyPair::from_seed(&[seed; 32])
}

fn contact_info_value() -> CrdsValue {
    let kp = keypair(0x11);
    let gossip: SocketAddr = "10.1.2.3:8001".parse().unwrap();
    let mut node = ContactInfo::new(kp.pubkey(), 1_700_000_000_000, gossip);
    node.shred_version = 0x0102;
    CrdsValue::new_signed(CrdsData::ContactInfo(node), &kp).unwrap()
}

fn contact_info_vector() -> TestVector {
    let value = contact_info_value();
    TestVector {
        name: "contact_info_value".into(),
        description: "signature || u32 discriminant || ContactInfo fields".into(),
        inputs: serde_json::json!({
            "seed_hex": hex::encode([0x11u8; 32]),
            "wallclock": value.wallclock(),
            "shred_version": 0x0102,
            "gossip": "10.1.2.3:8001",
        }),
        wire_bytes_hex: hex::encode(wire::serialize(&value).unwrap()),
        hash_hex: hex::encode(value.hash().0),
    }
}

fn ping_vector() -> TestVector {
    let ping = Ping::new([0x22; 32], &keypair(0x33));
    TestVector {
        name: "ping_message".into(),
        description: "Protocol::PingMessage(from, token, signature(token))".into(),
        inputs: serde_json::json!({
            "seed_hex": hex::encode([0x33u8; 32]),
            "token_hex": hex::encode([0x22u8; 32]),
        }),
        wire_bytes_hex: hex::encode(Protocol::PingMessage(ping).to_bytes().unwrap()),
        hash_hex: String::new(),
    }
}

fn pong_vector() -> TestVector {
    let ping = Ping::new([0x22; 32], &keypair(0x33));
    let pong = Pong::new(&ping, &keypair(0x44));
    TestVector {
        name: "pong_message".into(),
        description: "hash = BLAKE3(\"ping-pong\" || token)".into(),
        inputs: serde_json::json!({
            "seed_hex": hex::encode([0x44u8; 32]),
            "token_hex": hex::encode([0x22u8; 32]),
        }),
        wire_bytes_hex: hex::encode(Protocol::PongMessage(pong.clone()).to_bytes().unwrap()),
        hash_hex: hex::encode(pong.hash.0),
    }
}

fn prune_sign_bytes_vector() -> TestVector {
    let pubkey = Pubkey([0x55; 32]);
    let prunes = vec![Pubkey([0x66; 32])];
    let destination = Pubkey([0x77; 32]);
    let bytes = prune_sign_bytes(&pubkey, &prunes, &destination, 9).unwrap();
    TestVector {
        name: "prune_sign_bytes".into(),
        description: "\"prune-data\" || pubkey || prunes || destination || wallclock".into(),
        inputs: serde_json::json!({
            "pubkey_hex": hex::encode(pubkey.0),
            "prunes_hex": [hex::encode(prunes[0].0)],
            "destination_hex": hex::encode(destination.0),
            "wallclock": 9,
        }),
        wire_bytes_hex: hex::encode(&bytes),
        hash_hex: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_vectors() {
        let vectors = generate_test_vectors();
        assert_eq!(vectors.len(), 4);

        // Print JSON for manual inspection / export
        let json = serde_json::to_string_pretty(&vectors).unwrap();
        println!("Test Vectors:\n{}", json);
    }

    #[test]
    fn test_contact_info_layout() {
        let value = contact_info_value();
        let bytes = wire::serialize(&value).unwrap();
        // 64 signature + 4 discriminant + 32 pubkey + 8 wallclock + 8 outset
        // + 2 shred version + 4 sockets of (4 variant + 4 ip + 2 port)
        assert_eq!(bytes.len(), 64 + 4 + 32 + 8 + 8 + 2 + 4 * 10);
        assert_eq!(&bytes[..64], &value.signature().0[..]);
        assert_eq!(&bytes[64..68], &[0, 0, 0, 0]);
        assert_eq!(&bytes[68..100], &value.pubkey().0[..]);
        assert_eq!(&bytes[100..108], &1_700_000_000_000u64.to_le_bytes());
        assert_eq!(&bytes[116..118], &[0x02, 0x01]);
        // gossip socket: V4, 10.1.2.3, port 8001
        assert_eq!(&bytes[118..128], &[0, 0, 0, 0, 10, 1, 2, 3, 0x41, 0x1f]);
    }

    #[test]
    fn test_contact_info_hash_deterministic() {
        let v1 = contact_info_vector();
        let v2 = contact_info_vector();
        assert_eq!(v1.wire_bytes_hex, v2.wire_bytes_hex);
        assert_eq!(v1.hash_hex, v2.hash_hex);
    }

    #[test]
    fn test_ping_pong_layout() {
        let ping = hex::decode(ping_vector().wire_bytes_hex).unwrap();
        assert_eq!(ping.len(), 4 + 32 + 32 + 64);
        assert_eq!(&ping[..4], &[4, 0, 0, 0]);
        assert_eq!(&ping[36..68], &[0x22; 32]);

        let pong = hex::decode(pong_vector().wire_bytes_hex).unwrap();
        assert_eq!(pong.len(), 4 + 32 + 32 + 64);
        assert_eq!(&pong[..4], &[5, 0, 0, 0]);
    }

    #[test]
    fn test_prune_sign_bytes_layout() {
        let bytes = hex::decode(prune_sign_bytes_vector().wire_bytes_hex).unwrap();
        assert_eq!(&bytes[..10], b"prune-data");
        assert_eq!(&bytes[10..42], &[0x55; 32]);
        assert_eq!(&bytes[42..50], &1u64.to_le_bytes());
        assert_eq!(&bytes[50..82], &[0x66; 32]);
        assert_eq!(&bytes[82..114], &[0x77; 32]);
        assert_eq!(&bytes[114..], &9u64.to_le_bytes());
    }
}
