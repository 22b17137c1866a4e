use anyhow::{anyhow, Context, Result};
use ptm_decode::{
    BufferAccessor, Decoder, FrameDemuxer, FrameMode, MemSpace, MemoryMap, PacketParser, PtmConfig,
};
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(
    about = "A CoreSight PTM trace decoder, as specified in the CoreSight Program Flow Trace architecture specification (PFTv1.1). See <https://developer.arm.com/documentation/ihi0035/b/>."
)]
struct Opt {
    #[structopt(
        short,
        long,
        help = "Demultiplex 16-byte CoreSight frames before parsing (raw TPIU/ETB captures)"
    )]
    frames: bool,

    #[structopt(
        long,
        help = "Scan for FSYNC/HSYNC markers while demultiplexing (raw TPIU captures)"
    )]
    streaming: bool,

    #[structopt(
        short,
        long,
        default_value = "0",
        help = "Trace source ID to decode"
    )]
    trace_id: u8,

    #[structopt(short, long, help = "Expect cycle counts in the stream")]
    cycle_accurate: bool,

    #[structopt(
        long,
        default_value = "0",
        help = "Width of context ID packets in bytes (0-4)"
    )]
    context_id_bytes: u8,

    #[structopt(
        short,
        long,
        help = "Decode packets into generic trace elements (requires --image for instruction ranges)"
    )]
    elements: bool,

    #[structopt(
        long = "image",
        help = "Program image as file@hexaddr (repeatable), e.g. kernel.bin@0x80000000"
    )]
    images: Vec<String>,

    #[structopt(name = "FILE", parse(from_os_str))]
    file: PathBuf,
}

fn read_file(path: &PathBuf) -> Result<Vec<u8>> {
    let mut f = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)
        .with_context(|| format!("Failed to buffer {:?}", path))?;
    Ok(buf)
}

fn parse_image(spec: &str) -> Result<(PathBuf, u64)> {
    let (path, addr) = spec
        .rsplit_once('@')
        .ok_or_else(|| anyhow!("--image takes file@hexaddr, got {:?}", spec))?;
    let addr = u64::from_str_radix(addr.trim_start_matches("0x"), 16)
        .with_context(|| format!("Bad image address in {:?}", spec))?;
    Ok((PathBuf::from(path), addr))
}

fn main() -> Result<()> {
    let opt = Opt::from_args();

    let config = PtmConfig {
        trace_id: opt.trace_id,
        cycle_accurate: opt.cycle_accurate,
        context_id_bytes: opt.context_id_bytes,
        ..PtmConfig::default()
    };

    let raw = read_file(&opt.file)?;
    let stream = if opt.frames {
        let mode = if opt.streaming {
            FrameMode::Streaming
        } else {
            FrameMode::MemAligned
        };
        let mut demux = FrameDemuxer::new(mode);
        demux.push(&raw);
        demux.take(opt.trace_id)
    } else {
        raw
    };

    let mut parser = PacketParser::new(config);
    parser.push(&stream);

    let mut packets = vec![];
    while let Some(packet) = parser.pull() {
        packets.push(packet);
    }
    if let Some(packet) = parser.finalize() {
        packets.push(packet);
    }

    if !opt.elements {
        for packet in &packets {
            println!("{:#06x}: {:?}", packet.offset, packet.kind);
        }
        return Ok(());
    }

    let mut map = MemoryMap::new();
    for spec in &opt.images {
        let (path, addr) = parse_image(spec)?;
        let data = read_file(&path)?;
        map.add(BufferAccessor::new(addr, MemSpace::ANY, data))
            .map_err(|e| anyhow!("Failed to register {:?}: {}", spec, e))?;
    }

    let mut decoder = Decoder::new(config);
    if !opt.images.is_empty() {
        decoder.set_memory_map(map);
    }

    let mut elements = vec![];
    decoder
        .decode(&packets, &mut elements)
        .context("Decode failed")?;
    decoder.end(&mut elements);

    for element in &elements {
        match element.cycle_count {
            Some(cc) => println!("{:?} (cycles: {})", element.kind, cc),
            None => println!("{:?}", element.kind),
        }
    }

    Ok(())
}
