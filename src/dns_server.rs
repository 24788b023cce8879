//! UDP/TCP listeners and request handling

use crate::message::{Answer, Message};
use crate::types::{Opcode, Rcode};
use crate::wire::WireCursor;
use crate::zone::Zone;
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::watch;

/// UDP responses never ship more than this many octets past the header.
pub const MAX_UDP_PAYLOAD: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proto {
    Udp,
    Tcp,
}

impl Proto {
    pub fn name(self) -> &'static str {
        match self {
            Proto::Udp => "udp",
            Proto::Tcp => "tcp",
        }
    }
}

/// One listen endpoint, written on the command line as
/// `<proto>:<addr>:<port>`.
#[derive(Debug, Clone)]
pub struct Bind {
    pub proto: Proto,
    pub addr: SocketAddr,
}

impl std::str::FromStr for Bind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Bind> {
        let Some((proto, rest)) = s.split_once(':') else {
            anyhow::bail!("invalid bind '{}', expected <proto>:<addr>:<port>", s);
        };
        let proto = match proto.to_ascii_lowercase().as_str() {
            "udp" => Proto::Udp,
            "tcp" => Proto::Tcp,
            other => anyhow::bail!("invalid protocol '{}'", other),
        };
        let addr = rest
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid bind address '{}': {}", rest, e))?;
        Ok(Bind { proto, addr })
    }
}

pub struct DnsServer {
    zones: Arc<Vec<Arc<Zone>>>,
}

impl DnsServer {
    pub fn new(zones: Arc<Vec<Arc<Zone>>>) -> DnsServer {
        DnsServer { zones }
    }

    /// Binds every endpoint and serves until the shutdown signal fires.
    /// Each datagram and each TCP connection is handled on its own task,
    /// so a stalled peer never blocks the accept loops. Shutdown aborts
    /// the accept loops only; in-flight query tasks run to completion.
    pub async fn run(&self, binds: Vec<Bind>, mut shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        let mut tasks = Vec::new();

        for bind in binds {
            match bind.proto {
                Proto::Udp => {
                    let socket = match UdpSocket::bind(bind.addr).await {
                        Ok(s) => Arc::new(s),
                        Err(e) => {
                            tracing::error!("Failed to bind UDP {}: {}", bind.addr, e);
                            continue;
                        }
                    };
                    tracing::info!("🚀 Server successfully bound to UDP on {}", bind.addr);

                    let zones = self.zones.clone();
                    tasks.push(tokio::spawn(async move {
                        let mut buf = vec![0u8; 4096];
                        loop {
                            if let Ok((size, src)) = socket.recv_from(&mut buf).await {
                                let datagram = buf[..size].to_vec();
                                let zones = zones.clone();
                                let socket = socket.clone();

                                // 每个数据报一个任务, 互不阻塞
                                tokio::spawn(async move {
                                    if let Some(resp) = handle_packet(&zones, &datagram, src, Proto::Udp) {
                                        let _ = socket.send_to(&resp, src).await;
                                    }
                                });
                            }
                        }
                    }));
                }
                Proto::Tcp => {
                    let listener = match TcpListener::bind(bind.addr).await {
                        Ok(l) => l,
                        Err(e) => {
                            tracing::error!("Failed to bind TCP {}: {}", bind.addr, e);
                            continue;
                        }
                    };
                    tracing::info!("🚀 Server successfully bound to TCP on {}", bind.addr);

                    let zones = self.zones.clone();
                    tasks.push(tokio::spawn(async move {
                        loop {
                            if let Ok((mut stream, src)) = listener.accept().await {
                                let zones = zones.clone();

                                tokio::spawn(async move {
                                    // TCP 帧以 16 位大端长度开头
                                    let mut len_buf = [0u8; 2];
                                    if stream.read_exact(&mut len_buf).await.is_err() {
                                        return;
                                    }
                                    let len = u16::from_be_bytes(len_buf) as usize;

                                    let mut frame = vec![0u8; len];
                                    if stream.read_exact(&mut frame).await.is_err() {
                                        return;
                                    }

                                    if let Some(resp) = handle_packet(&zones, &frame, src, Proto::Tcp) {
                                        let _ = stream.write_all(&resp).await;
                                    }
                                });
                            }
                        }
                    }));
                }
            }
        }

        // 收到退出信号后停止接收新请求, 在途查询自行跑完
        let _ = shutdown_rx.changed().await;
        for task in tasks {
            task.abort();
        }
        Ok(())
    }
}

/// Decodes one inbound message, answers it, and encodes the response.
/// Malformed input kills only this message. UDP responses whose record
/// sections exceed 512 octets are flagged truncated and sent without
/// those sections.
fn handle_packet(zones: &[Arc<Zone>], bytes: &[u8], src: SocketAddr, proto: Proto) -> Option<Vec<u8>> {
    let request = match Message::deserialize(&mut WireCursor::from_bytes(bytes.to_vec())) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!("[server] Dropping malformed {} message from {}: {}", proto.name(), src, e);
            return None;
        }
    };

    if tracing::enabled!(tracing::Level::DEBUG) {
        tracing::debug!("[server] Accepting {} request from {}.", proto.name(), src);
        tracing::debug!("[server] >>> Incoming message dump:{}", dump(bytes));
    }

    let mut response = answer_request(zones, &request, src);

    if proto == Proto::Udp && response.rsection_size() > MAX_UDP_PAYLOAD {
        // 超长回应: 打上 TC 标志并丢弃所有记录段
        response.clear();
        response.flags.tc = true;
    }

    let with_length_prefix = proto == Proto::Tcp;
    let encoded = match response.encode(with_length_prefix) {
        Ok(bytes) => bytes,
        Err(e) => {
            // 组装失败降级为 ServFail 空回应
            tracing::error!("[server] '{}' assembling response #{}", e, response.id);
            let mut failure = request.response();
            failure.flags.rcode = Rcode::ServFail.code();
            failure.encode(with_length_prefix).ok()?
        }
    };

    if tracing::enabled!(tracing::Level::DEBUG) {
        tracing::debug!("[server] <<< Outgoing message dump:{}", dump(&encoded));
    }
    Some(encoded)
}

/// Walks the request's queries against the configured zones and fills in
/// the response. Non-query opcodes answer NotImp; names outside every
/// zone answer NXDomain; names inside a zone with no matching record
/// answer NotZone.
pub fn answer_request(zones: &[Arc<Zone>], request: &Message, remote: SocketAddr) -> Message {
    let mut response = request.response();

    if Opcode::from_code(request.flags.opcode) != Some(Opcode::Query) {
        response.flags.rcode = Rcode::NotImp.code();
        return response;
    }

    for query in &request.queries {
        let mut valid_zone = false;
        let mut handled = false;

        for zone in zones {
            let data = zone.snapshot();
            if !data.contains(&query.name) {
                continue;
            }
            valid_zone = true;

            let Some(record) = data.resolve(&query.name, query.rtype, query.class) else {
                continue;
            };

            handled = true;
            response.flags.aa = true;
            for rdata in record.evaluate(query, &remote) {
                tracing::debug!("[server] Adding resource record '{}' to answer.", rdata.rtype().name());
                let answer = Answer {
                    name: query.name.clone(),
                    rtype: rdata.rtype(),
                    class: query.class,
                    ttl: record.effective_ttl(data.default_ttl()),
                    rdata,
                };
                // 脚本改写过类型的记录放进 additional 段
                if answer.rtype == query.rtype {
                    response.answers.push(answer);
                } else {
                    response.additional.push(answer);
                }
            }
            break;
        }

        if !valid_zone {
            response.clear();
            response.flags.rcode = Rcode::NXDomain.code();
        } else if !handled {
            response.clear();
            response.flags.rcode = Rcode::NotZone.code();
        }
    }

    if response.flags.rcode != Rcode::NoError.code() {
        tracing::debug!("[server] RCode={} for request #{}", response.flags.rcode, request.id);
    }
    response
}

/// Hex dump for the debug log, 16 octets per row.
fn dump(bytes: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in bytes.chunks(16).enumerate() {
        out.push_str(&format!("\n{:04x}  ", row * 16));
        for byte in chunk {
            out.push_str(&format!("{:02x} ", byte));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{HeaderFlags, Query};
    use crate::rdata::{Rdata, TextData};
    use crate::record::Record;
    use crate::script::testing::StaticScript;
    use crate::script::ScriptOutput;
    use crate::types::{RecordClass, RecordType};
    use crate::zone::ZoneData;

    fn remote() -> SocketAddr {
        "203.0.113.5:40000".parse().unwrap()
    }

    fn sample_zones() -> Vec<Arc<Zone>> {
        let mut data = ZoneData::new();
        data.set_origin("example.com.");
        data.set_default_ttl(3600);
        data.add_record(
            Record::new(
                "example.com",
                "www",
                RecordClass::IN,
                RecordType::A,
                0,
                Rdata::A { addr: "192.0.2.1".parse().unwrap() },
            )
            .unwrap(),
        )
        .unwrap();
        vec![Arc::new(Zone::from_data(data))]
    }

    fn request_for(name: &str, rtype: RecordType) -> Message {
        Message {
            id: 0x1234,
            flags: HeaderFlags { rd: true, ..HeaderFlags::default() },
            queries: vec![Query {
                name: name.to_string(),
                rtype,
                class: RecordClass::IN,
            }],
            ..Message::default()
        }
    }

    #[test]
    fn answers_known_name_authoritatively() {
        let zones = sample_zones();
        let response = answer_request(&zones, &request_for("www.example.com", RecordType::A), remote());

        assert_eq!(response.id, 0x1234);
        assert!(response.flags.qr);
        assert!(response.flags.aa);
        assert_eq!(response.flags.rcode, Rcode::NoError.code());
        assert_eq!(response.answers.len(), 1);
        assert_eq!(response.answers[0].ttl, 3600);
        assert_eq!(response.answers[0].rdata, Rdata::A { addr: "192.0.2.1".parse().unwrap() });
    }

    #[test]
    fn unknown_zone_answers_nxdomain() {
        let zones = sample_zones();
        let response = answer_request(&zones, &request_for("www.other.org", RecordType::A), remote());
        assert_eq!(response.flags.rcode, Rcode::NXDomain.code());
        assert!(response.answers.is_empty());
    }

    #[test]
    fn known_zone_without_record_answers_notzone() {
        let zones = sample_zones();
        let response = answer_request(&zones, &request_for("missing.example.com", RecordType::A), remote());
        assert_eq!(response.flags.rcode, Rcode::NotZone.code());
        assert!(response.answers.is_empty());
    }

    #[test]
    fn non_query_opcodes_answer_notimp() {
        let zones = sample_zones();
        let mut request = request_for("www.example.com", RecordType::A);
        request.flags.opcode = Opcode::Update as u8;
        let response = answer_request(&zones, &request, remote());
        assert_eq!(response.flags.rcode, Rcode::NotImp.code());
    }

    #[test]
    fn type_rewritten_records_land_in_additional() {
        let script = StaticScript::with_response_type(
            ScriptOutput::Single(TextData::Value("rewritten".to_string())),
            "TXT",
        );
        let mut data = ZoneData::new();
        data.set_origin("example.com");
        data.add_record(
            Record::scripted("example.com", "dyn", RecordClass::IN, RecordType::A, 0, script).unwrap(),
        )
        .unwrap();
        let zones = vec![Arc::new(Zone::from_data(data))];

        let response = answer_request(&zones, &request_for("dyn.example.com", RecordType::A), remote());
        assert!(response.answers.is_empty());
        assert_eq!(response.additional.len(), 1);
        assert_eq!(response.additional[0].rtype, RecordType::TXT);
    }

    #[test]
    fn oversized_udp_response_is_truncated() {
        // 脚本一次吐出 40 条 TXT, 远超 512 字节
        let values: Vec<TextData> = (0..40)
            .map(|i| TextData::Value(format!("payload-number-{:04}", i)))
            .collect();
        let script = StaticScript::with_response_type(ScriptOutput::Tuple(values), "TXT");

        let mut data = ZoneData::new();
        data.set_origin("example.com");
        data.add_record(
            Record::scripted("example.com", "big", RecordClass::IN, RecordType::TXT, 0, script).unwrap(),
        )
        .unwrap();
        let zones = vec![Arc::new(Zone::from_data(data))];

        let request = request_for("big.example.com", RecordType::TXT);
        let wire = request.encode(false).unwrap();

        let udp = handle_packet(&zones, &wire, remote(), Proto::Udp).unwrap();
        let udp_msg = Message::deserialize(&mut WireCursor::from_bytes(udp)).unwrap();
        assert!(udp_msg.flags.tc);
        assert!(udp_msg.answers.is_empty());

        // 同一查询走 TCP 则完整返回
        let tcp = handle_packet(&zones, &wire, remote(), Proto::Tcp).unwrap();
        let framed_len = u16::from_be_bytes([tcp[0], tcp[1]]) as usize;
        assert_eq!(framed_len, tcp.len() - 2);
        let tcp_msg = Message::deserialize(&mut WireCursor::from_bytes(tcp[2..].to_vec())).unwrap();
        assert!(!tcp_msg.flags.tc);
        assert_eq!(tcp_msg.answers.len(), 40);
    }

    #[test]
    fn malformed_packets_are_dropped() {
        let zones = sample_zones();
        assert!(handle_packet(&zones, &[0x12, 0x34, 0x01], remote(), Proto::Udp).is_none());
    }
}
