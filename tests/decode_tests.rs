//! End-to-end byte stream scenarios: raw bytes through the parser (and
//! optionally the frame demuxer) into the decoder, checked against
//! fully specified packet and element sequences.

use ptm_decode::*;

fn parse_all(config: PtmConfig, stream: &[u8]) -> Vec<TracePacket> {
    let mut parser = PacketParser::new(config);
    parser.push(stream);
    let mut packets = vec![];
    while let Some(packet) = parser.pull() {
        packets.push(packet);
    }
    packets
}

fn decode_stream(config: PtmConfig, stream: &[u8]) -> Vec<TraceElement> {
    let packets = parse_all(config, stream);
    let mut decoder = Decoder::new(config);
    let mut out = vec![];
    decoder.decode(&packets, &mut out).unwrap();
    out
}

#[test]
fn async_alone() {
    let stream: &[u8] = &[0x00, 0x00, 0x00, 0x00, 0x00, 0x80];
    let packets = parse_all(PtmConfig::default(), stream);
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].kind, PacketKind::Async);

    // the decoder announces the initial lack of sync and then waits
    // for an I-sync
    let elements = decode_stream(PtmConfig::default(), stream);
    assert_eq!(elements, vec![TraceElement::new(ElementKind::NoSync)]);
}

#[test]
fn async_and_isync() {
    #[rustfmt::skip]
    let stream: &[u8] = &[
        // A-sync
        0x00, 0x00, 0x00, 0x00, 0x00, 0x80,
        // I-sync: address 0x80000200, ARM, non-secure, periodic
        0x08, 0x00, 0x02, 0x00, 0x80, 0x08,
    ];

    let packets = parse_all(PtmConfig::default(), stream);
    assert_eq!(packets.len(), 2);

    let mut decoder = Decoder::new(PtmConfig::default());
    let mut elements = vec![];
    decoder.decode(&packets, &mut elements).unwrap();

    assert_eq!(
        elements,
        vec![
            TraceElement::new(ElementKind::NoSync),
            TraceElement::new(ElementKind::TraceOn {
                reason: TraceOnReason::Normal,
            }),
            TraceElement::new(ElementKind::PeContext(PeContext {
                isa: Isa::Arm,
                secure: false,
                el: ExceptionLevel::El0,
                context_id: 0,
                vmid: 0,
                is_64bit: false,
            })),
        ]
    );
    assert_eq!(decoder.address(), Some(0x8000_0200));
}

#[test]
fn short_timestamp() {
    #[rustfmt::skip]
    let stream: &[u8] = &[
        0x00, 0x00, 0x00, 0x00, 0x00, 0x80,
        0x08, 0x00, 0x02, 0x00, 0x80, 0x08,
        // timestamp, 7 update bits, value 0x25
        0x42, 0x25,
    ];

    let packets = parse_all(PtmConfig::default(), stream);
    assert_eq!(
        packets[2].kind,
        PacketKind::Timestamp {
            value: 0x25,
            update_bits: 7,
            cycle_count: None,
        }
    );

    let elements = decode_stream(PtmConfig::default(), stream);
    assert_eq!(
        elements.last(),
        Some(&TraceElement::new(ElementKind::Timestamp {
            timestamp: 0x25
        }))
    );
}

#[test]
fn atom_bit_convention() {
    #[rustfmt::skip]
    let stream: &[u8] = &[
        0x00, 0x00, 0x00, 0x00, 0x00, 0x80,
        0x98,
    ];

    let packets = parse_all(PtmConfig::default(), stream);
    // 0b1001_1000: stop bit at position 5, atoms E E N N E (LSB is
    // atom 0, stored bit 1 = Executed)
    assert_eq!(
        packets[1].kind,
        PacketKind::Atom {
            en_bits: 0b11001,
            count: 5,
            cycle_count: None,
        }
    );
}

#[test]
fn frames_to_elements_pipeline() {
    // one frame carrying A-sync + I-sync for source 0x10, padded with
    // ignore packets
    #[rustfmt::skip]
    let capture: &[u8] = &[
        (0x10 << 1) | 1,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x80,
        0x08, 0x00, 0x02, 0x00, 0x80, 0x08,
        0x66, 0x66,
        0x00,
    ];

    let mut demux = FrameDemuxer::new(FrameMode::MemAligned);
    demux.push(capture);
    let stream = demux.take(0x10);
    assert_eq!(stream.len(), 14);

    let packets = parse_all(PtmConfig::default(), &stream);
    assert_eq!(packets.len(), 4);
    assert_eq!(packets[0].kind, PacketKind::Async);
    assert_eq!(packets[2].kind, PacketKind::Ignore);
    assert_eq!(packets[3].kind, PacketKind::Ignore);

    let elements = decode_stream(PtmConfig::default(), &stream);
    assert_eq!(elements.len(), 3, "{:?}", elements);
}

#[test]
fn cycle_counts_propagate_to_elements() {
    let config = PtmConfig {
        cycle_accurate: true,
        ..PtmConfig::default()
    };

    #[rustfmt::skip]
    let stream: &[u8] = &[
        0x00, 0x00, 0x00, 0x00, 0x00, 0x80,
        // I-sync with a trailing cycle count of 0x32
        0x08, 0x00, 0x02, 0x00, 0x80, 0x08, 0x32,
    ];

    let elements = decode_stream(config, stream);
    assert_eq!(elements.len(), 3);
    assert_eq!(elements[0].cycle_count, None, "NoSync precedes the packet");
    assert_eq!(elements[1].cycle_count, Some(0x32));
    assert_eq!(elements[2].cycle_count, Some(0x32));
}

#[test]
fn bad_sequence_resynchronizes() {
    #[rustfmt::skip]
    let stream: &[u8] = &[
        0x00, 0x00, 0x00, 0x00, 0x00, 0x80,
        0x08, 0x00, 0x02, 0x00, 0x80, 0x08,
        // a reserved header: the decoder must drop sync
        0x02,
        // and recover on the next A-sync + I-sync pair
        0x00, 0x00, 0x00, 0x00, 0x00, 0x80,
        0x08, 0x00, 0x02, 0x00, 0x80, 0x08,
    ];

    let elements = decode_stream(PtmConfig::default(), stream);
    let kinds: Vec<_> = elements.iter().map(|e| &e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            &ElementKind::NoSync,
            &ElementKind::TraceOn {
                reason: TraceOnReason::Normal
            },
            &ElementKind::PeContext(PeContext {
                isa: Isa::Arm,
                secure: false,
                el: ExceptionLevel::El0,
                context_id: 0,
                vmid: 0,
                is_64bit: false,
            }),
            // fresh NoSync on the reserved header
            &ElementKind::NoSync,
            // context did not change, so only trace-on re-appears
            &ElementKind::TraceOn {
                reason: TraceOnReason::Normal
            },
        ]
    );
}

#[test]
fn unsynced_garbage_yields_single_nosync() {
    #[rustfmt::skip]
    let stream: &[u8] = &[
        0xde, 0xad, 0xbe, 0xef,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x80,
    ];

    let packets = parse_all(PtmConfig::default(), stream);
    assert_eq!(packets.len(), 2);
    assert_eq!(packets[0].kind, PacketKind::NoSync);
    assert_eq!(packets[1].kind, PacketKind::Async);
    assert_eq!(packets[1].offset, 4);

    let elements = decode_stream(PtmConfig::default(), stream);
    assert_eq!(elements, vec![TraceElement::new(ElementKind::NoSync)]);
}

#[test]
fn finalize_reports_truncated_stream() {
    let mut parser = PacketParser::new(PtmConfig::default());
    #[rustfmt::skip]
    parser.push(&[
        0x00, 0x00, 0x00, 0x00, 0x00, 0x80,
        // I-sync cut short
        0x08, 0x00, 0x02,
    ]);

    let mut packets = vec![];
    while let Some(packet) = parser.pull() {
        packets.push(packet);
    }
    if let Some(packet) = parser.finalize() {
        packets.push(packet);
    }

    assert_eq!(packets.len(), 2);
    assert_eq!(packets[1].kind, PacketKind::IncompleteEot);

    let mut decoder = Decoder::new(PtmConfig::default());
    let mut elements = vec![];
    decoder.decode(&packets, &mut elements).unwrap();
    assert_eq!(
        elements,
        vec![TraceElement::new(ElementKind::NoSync)],
        "EOT arrives before sync completes, so only NoSync is out"
    );
}

#[test]
fn vmid_and_context_updates() {
    let config = PtmConfig {
        context_id_bytes: 2,
        ..PtmConfig::default()
    };

    #[rustfmt::skip]
    let stream: &[u8] = &[
        0x00, 0x00, 0x00, 0x00, 0x00, 0x80,
        // I-sync with context id 0
        0x08, 0x00, 0x02, 0x00, 0x80, 0x08, 0x00, 0x00,
        // context id switches to 0x1234
        0x6e, 0x34, 0x12,
        // VMID switches to 5
        0x3c, 0x05,
    ];

    let elements = decode_stream(config, stream);
    let contexts: Vec<_> = elements
        .iter()
        .filter_map(|e| match &e.kind {
            ElementKind::PeContext(context) => Some(context),
            _ => None,
        })
        .collect();
    assert_eq!(contexts.len(), 3);
    assert_eq!(contexts[1].context_id, 0x1234);
    assert_eq!(contexts[2].vmid, 5);
    assert_eq!(contexts[2].context_id, 0x1234, "context id sticks");
}
