//! Capture pipeline: a pcap producer thread pushes raw Ethernet frames into
//! a queue; a single consumer drains it and runs each frame through fragment
//! reassembly, server location, TCP resequencing, frame splitting and
//! interpretation before touching the next one. Capture order is processing
//! order.

use crate::capture::fragment::FragmentKey;
use crate::capture::locator::{self, ServerAddr};
use crate::protocol::frame::{peek_len, FRAME_LEN_CEILING, MIN_FRAME_LEN};
use crate::session::Session;
use crate::{now_ms, AppState};
use crossbeam_channel::{unbounded, Receiver, Sender};
use etherparse::{NetHeaders, PacketHeaders, TcpHeader, TransportHeader};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

const CAPTURE_FILTER: &str = "ip and tcp";
const CAPTURE_BUFFER_BYTES: i32 = 10 * 1024 * 1024;
const CAPTURE_SNAPLEN: i32 = 65535;

/// Spawns the producer and consumer threads. Returns once both are running;
/// they live until the process exits or the capture handle dies.
pub fn spawn(state: Arc<AppState>, device: pcap::Device) -> std::io::Result<()> {
    let (tx, rx) = unbounded::<Vec<u8>>();

    let device_name = device.name.clone();
    thread::Builder::new()
        .name("capture".into())
        .spawn(move || capture_loop(device, tx))?;
    thread::Builder::new()
        .name("assembler".into())
        .spawn(move || consume_loop(state, rx))?;

    log::info!("Capture started on device {}", device_name);
    Ok(())
}

fn capture_loop(device: pcap::Device, tx: Sender<Vec<u8>>) {
    let capture = pcap::Capture::from_device(device)
        .and_then(|cap| {
            cap.promisc(true)
                .immediate_mode(true)
                .snaplen(CAPTURE_SNAPLEN)
                .buffer_size(CAPTURE_BUFFER_BYTES)
                .open()
        })
        .and_then(|mut cap| {
            cap.filter(CAPTURE_FILTER, true)?;
            Ok(cap)
        });

    let mut capture = match capture {
        Ok(cap) => cap,
        Err(e) => {
            log::error!("Failed to open capture device: {}", e);
            return;
        }
    };

    if capture.get_datalink() != pcap::Linktype::ETHERNET {
        log::error!(
            "The device seems to be WRONG! Please check the device! Link type: {:?}",
            capture.get_datalink()
        );
    }

    loop {
        match capture.next_packet() {
            Ok(packet) => {
                if tx.send(packet.data.to_vec()).is_err() {
                    break;
                }
            }
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(e) => {
                log::error!("Capture read error: {}", e);
                break;
            }
        }
    }
}

fn consume_loop(state: Arc<AppState>, rx: Receiver<Vec<u8>>) {
    for frame in rx.iter() {
        process_eth_frame(&state, &frame);
    }
}

/// One captured Ethernet frame, fully processed.
pub(crate) fn process_eth_frame(state: &AppState, frame: &[u8]) {
    let headers = match PacketHeaders::from_ethernet_slice(frame) {
        Ok(h) => h,
        Err(_) => return, // drop malformed frames
    };

    let ipv4 = match headers.net {
        Some(NetHeaders::Ipv4(ipv4, _)) => ipv4,
        _ => return,
    };
    if ipv4.protocol != etherparse::IpNumber::TCP {
        return;
    }

    let now = now_ms();
    let mut session = state.session.lock().unwrap();

    // Fragmented datagrams park in the reassembler until complete; etherparse
    // leaves their transport layer unparsed, so the assembled TCP segment is
    // reparsed below
    let assembled;
    let (tcp, payload): (TcpHeader, &[u8]) = if ipv4.is_fragmenting_payload() {
        let key = FragmentKey {
            ident: ipv4.identification,
            src: ipv4.source,
            dst: ipv4.destination,
            protocol: ipv4.protocol.0,
        };
        let offset = ipv4.fragment_offset.value() as usize * 8;
        let data = headers.payload.slice();

        assembled = match session
            .fragments
            .push(key, offset, ipv4.more_fragments, data, now)
        {
            Some(datagram) => datagram,
            None => return, // incomplete
        };

        match TcpHeader::from_slice(&assembled) {
            Ok((tcp, rest)) => {
                let header_len = assembled.len() - rest.len();
                (tcp, &assembled[header_len..])
            }
            Err(_) => {
                log::debug!("Reassembled datagram has no parsable TCP header");
                return;
            }
        }
    } else {
        match headers.transport {
            Some(TransportHeader::Tcp(tcp)) => (tcp, headers.payload.slice()),
            _ => return,
        }
    };

    handle_segment(
        state,
        &mut session,
        ServerAddr {
            src_ip: ipv4.source,
            src_port: tcp.source_port,
            dst_ip: ipv4.destination,
            dst_port: tcp.destination_port,
        },
        tcp.sequence_number,
        payload,
        now,
    );
}

fn handle_segment(
    state: &AppState,
    session: &mut Session,
    addr: ServerAddr,
    seq: u32,
    payload: &[u8],
    now: u64,
) {
    if session.server != Some(addr) {
        if payload.is_empty() {
            return;
        }
        // Not our connection (or none yet): run the locator heuristics, drop
        // the segment otherwise
        if locator::matches_scene_server(payload) {
            log::info!("Got Scene Server Address: {}", addr);
        } else if locator::matches_login_return(payload) {
            log::info!("Got Scene Server Address by Login Return Packet: {}", addr);
        } else {
            return;
        }

        let clear_stats = state.settings.lock().unwrap().auto_clear_on_server_change;
        session.switch_server(
            addr,
            seq.wrapping_add(payload.len() as u32),
            clear_stats,
            &state.history,
        );
        return;
    }

    if payload.is_empty() {
        return; // bare ACKs
    }

    session.tcp.push_segment(seq, payload, now);
    drain_frames(state, session);
}

/// Splits every complete frame off the accumulation buffer and hands it to
/// the processor. A length field above the sanity ceiling means the stream
/// is corrupted beyond recovery; continuing would only misparse and grow
/// without bound, so the process exits.
fn drain_frames(state: &AppState, session: &mut Session) {
    loop {
        let declared = match peek_len(&session.tcp.buf) {
            Some(len) => len,
            None => break,
        };

        if declared > FRAME_LEN_CEILING {
            log::error!(
                "Invalid frame length {:#x} in stream (buffered {} bytes), terminating",
                declared,
                session.tcp.buf.len()
            );
            if let Some(flush) = session.users.cache.take_flush_forced() {
                flush.write();
            }
            std::process::exit(1);
        }
        if declared < MIN_FRAME_LEN {
            log::debug!("Frame length {} below minimum, waiting for reset", declared);
            break;
        }
        if (session.tcp.buf.len() as u32) < declared {
            break; // wait for more data
        }

        let frame_bytes: Vec<u8> = session.tcp.buf.drain(..declared as usize).collect();
        if state.paused.load(Ordering::Relaxed) {
            continue;
        }
        let elite_only = state.settings.lock().unwrap().only_record_elite_dummy;

        let Session {
            processor, users, ..
        } = &mut *session;
        processor.process_packet(&frame_bytes, users, elite_only);
    }
}
