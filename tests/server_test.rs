//! End-to-end: parse a zone, answer queries over the wire codec.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use redns_rust::dns_server::answer_request;
use redns_rust::message::{HeaderFlags, Message, Query};
use redns_rust::rdata::{Rdata, TextData};
use redns_rust::script::{Script, ScriptContext, ScriptEngine, ScriptError, ScriptOutput};
use redns_rust::types::{Rcode, RecordClass, RecordType};
use redns_rust::wire::WireCursor;
use redns_rust::zone::{Zone, ZoneData};
use redns_rust::zone_parser::ZoneParser;

const ZONE_TEXT: &str = concat!(
    "$ORIGIN example.com.\n",
    "$TTL 3600\n",
    "@ IN SOA ns1 admin ( 2021010100 3600 900 604800 3600 )\n",
    "www IN A 192.0.2.1\n",
    "@ IN MX 10 mail.example.com.\n",
    "/^host[0-9]+$/ IN A 192.0.2.99\n",
    "dyn IN A <?lua return remoteAddress ?>\n",
);

/// Echoes the querying client's address, like a "whoami" record.
struct EchoScript {
    calls: AtomicUsize,
}

impl Script for EchoScript {
    fn call(&self, ctx: &mut ScriptContext) -> Result<ScriptOutput, ScriptError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptOutput::Single(TextData::Value(ctx.remote_address.clone())))
    }
}

struct EchoEngine {
    script: Arc<EchoScript>,
}

impl ScriptEngine for EchoEngine {
    fn compile(&self, _source: &str) -> Result<Arc<dyn Script>, ScriptError> {
        Ok(self.script.clone())
    }
}

fn load_zones() -> (Vec<Arc<Zone>>, Arc<EchoScript>) {
    let script = Arc::new(EchoScript { calls: AtomicUsize::new(0) });
    let engine = Arc::new(EchoEngine { script: script.clone() });
    let data: ZoneData = ZoneParser::new(engine).parse(ZONE_TEXT).unwrap();
    (vec![Arc::new(Zone::from_data(data))], script)
}

fn remote() -> SocketAddr {
    "203.0.113.77:5353".parse().unwrap()
}

fn roundtrip_query(zones: &[Arc<Zone>], name: &str, rtype: RecordType) -> Message {
    let request = Message {
        id: 0x4242,
        flags: HeaderFlags { rd: true, ..HeaderFlags::default() },
        queries: vec![Query {
            name: name.to_string(),
            rtype,
            class: RecordClass::IN,
        }],
        ..Message::default()
    };

    // 走一遍完整的编解码路径
    let wire = request.encode(false).unwrap();
    let decoded = Message::deserialize(&mut WireCursor::from_bytes(wire)).unwrap();
    assert_eq!(decoded, request);

    let response = answer_request(zones, &decoded, remote());
    let wire = response.encode(false).unwrap();
    Message::deserialize(&mut WireCursor::from_bytes(wire)).unwrap()
}

#[test]
fn static_record_end_to_end() {
    let (zones, _) = load_zones();
    let response = roundtrip_query(&zones, "www.example.com", RecordType::A);

    assert_eq!(response.id, 0x4242);
    assert!(response.flags.qr);
    assert!(response.flags.aa);
    assert_eq!(response.flags.rcode, Rcode::NoError.code());
    assert_eq!(response.answers.len(), 1);
    assert_eq!(response.answers[0].ttl, 3600);
    assert_eq!(response.answers[0].rdata, Rdata::A { addr: "192.0.2.1".parse().unwrap() });
}

#[test]
fn soa_record_end_to_end() {
    let (zones, _) = load_zones();
    let response = roundtrip_query(&zones, "example.com", RecordType::SOA);

    assert_eq!(response.answers.len(), 1);
    let Rdata::SOA(soa) = &response.answers[0].rdata else {
        panic!("expected SOA payload");
    };
    assert_eq!(soa.serial, 2021010100);
    assert_eq!(soa.minimum, 3600);
}

#[test]
fn pattern_record_end_to_end() {
    let (zones, _) = load_zones();

    let hit = roundtrip_query(&zones, "host42.example.com", RecordType::A);
    assert_eq!(hit.answers.len(), 1);
    assert_eq!(hit.answers[0].rdata, Rdata::A { addr: "192.0.2.99".parse().unwrap() });

    let miss = roundtrip_query(&zones, "hostx.example.com", RecordType::A);
    assert_eq!(miss.flags.rcode, Rcode::NotZone.code());
}

#[test]
fn rcode_distinguishes_unknown_zone_from_unknown_name() {
    let (zones, _) = load_zones();

    let outside = roundtrip_query(&zones, "www.elsewhere.net", RecordType::A);
    assert_eq!(outside.flags.rcode, Rcode::NXDomain.code());

    let inside = roundtrip_query(&zones, "nothing.example.com", RecordType::A);
    assert_eq!(inside.flags.rcode, Rcode::NotZone.code());
}

#[test]
fn scripted_record_runs_fresh_on_every_query() {
    let (zones, script) = load_zones();

    for _ in 0..2 {
        let response = roundtrip_query(&zones, "dyn.example.com", RecordType::A);
        assert_eq!(response.answers.len(), 1);
        assert_eq!(
            response.answers[0].rdata,
            Rdata::A { addr: "203.0.113.77".parse().unwrap() }
        );
    }
    assert_eq!(script.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn static_results_are_cached_across_queries() {
    let (zones, _) = load_zones();

    let first = roundtrip_query(&zones, "www.example.com", RecordType::A);
    let second = roundtrip_query(&zones, "www.example.com", RecordType::A);
    assert_eq!(first, second);
    assert_eq!(zones[0].snapshot().scan_count(), 1);
}
