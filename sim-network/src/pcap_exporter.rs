use crate::sim::SimTime;
use anyhow::Context;
use parking_lot::Mutex;
use pcap_file::pcapng::PcapNgWriter;
use pcap_file::pcapng::blocks::enhanced_packet::EnhancedPacketBlock;
use pcap_file::pcapng::blocks::interface_description::InterfaceDescriptionBlock;
use pcap_file::pcapng::blocks::section_header::SectionHeaderBlock;
use pcap_file::{DataLink, Endianness};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub trait PcapExporterFactory {
    fn create_pcap_exporter(
        &self,
        file_name: &str,
        link_type: DataLink,
    ) -> anyhow::Result<PcapExporter>;
}

pub struct NoOpPcapExporterFactory;
impl PcapExporterFactory for NoOpPcapExporterFactory {
    fn create_pcap_exporter(&self, _: &str, link_type: DataLink) -> anyhow::Result<PcapExporter> {
        PcapExporter::new(std::io::sink(), link_type)
    }
}

/// Writes one capture file per traced device, inside `directory`
pub struct FileBasedPcapExporterFactory {
    pub directory: PathBuf,
}

impl PcapExporterFactory for FileBasedPcapExporterFactory {
    fn create_pcap_exporter(
        &self,
        file_name: &str,
        link_type: DataLink,
    ) -> anyhow::Result<PcapExporter> {
        let path = self.directory.join(file_name);
        let pcap_file = fs::File::create(&path)
            .with_context(|| format!("failed to open {} for writing", path.display()))?;
        PcapExporter::new(pcap_file, link_type)
    }
}

/// Keeps captures in memory, so they can be inspected after the simulation
#[derive(Clone, Default)]
pub struct InMemoryPcapExporterFactory {
    captures: Arc<Mutex<BTreeMap<String, SharedBuffer>>>,
}

impl InMemoryPcapExporterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file_names(&self) -> Vec<String> {
        self.captures.lock().keys().cloned().collect()
    }

    pub fn capture(&self, file_name: &str) -> Option<Vec<u8>> {
        self.captures
            .lock()
            .get(file_name)
            .map(|buffer| buffer.0.lock().clone())
    }
}

impl PcapExporterFactory for InMemoryPcapExporterFactory {
    fn create_pcap_exporter(
        &self,
        file_name: &str,
        link_type: DataLink,
    ) -> anyhow::Result<PcapExporter> {
        let buffer = SharedBuffer::default();
        self.captures
            .lock()
            .insert(file_name.to_string(), buffer.clone());
        PcapExporter::new(buffer, link_type)
    }
}

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub struct PcapExporter {
    total_tracked_packets: AtomicU64,
    writer: Mutex<PcapNgWriter<BufWriter<Box<dyn Write + 'static>>>>,
}

impl PcapExporter {
    pub fn new(writer: impl Write + 'static, link_type: DataLink) -> anyhow::Result<Self> {
        let writer: Box<dyn Write + 'static> = Box::new(writer);
        let mut writer = PcapNgWriter::with_section_header(
            BufWriter::new(writer),
            SectionHeaderBlock {
                endianness: Endianness::Big,
                major_version: 1,
                minor_version: 0,
                section_length: -1,
                options: vec![],
            },
        )
        .context("failed to write pcap section header")?;

        writer
            .write_pcapng_block(InterfaceDescriptionBlock {
                linktype: link_type,
                snaplen: 65535,
                options: vec![],
            })
            .context("failed to write pcap interface description")?;

        Ok(Self {
            total_tracked_packets: AtomicU64::new(0),
            writer: Mutex::new(writer),
        })
    }

    pub fn total_tracked_packets(&self) -> u64 {
        self.total_tracked_packets.load(Ordering::Relaxed)
    }

    pub fn flush(&self) -> anyhow::Result<()> {
        self.writer
            .lock()
            .get_mut()
            .flush()
            .context("failed to flush pcap writer")
    }

    /// Records a frame seen by the device at simulated time `now`
    pub fn track_frame(&self, now: SimTime, frame: &[u8]) -> anyhow::Result<()> {
        self.total_tracked_packets.fetch_add(1, Ordering::Relaxed);

        let mut writer = self.writer.lock();
        writer
            .write_pcapng_block(EnhancedPacketBlock {
                interface_id: 0,
                timestamp: correct_timestamp(now.as_duration()),
                original_len: frame.len() as u32,
                data: frame.into(),
                options: Vec::new(),
            })
            .context("failed to write captured frame")?;

        Ok(())
    }
}

fn correct_timestamp(d: Duration) -> Duration {
    // The interface uses the default microsecond resolution, but the library writes the raw
    // nanosecond count, so we hand it the number of microseconds instead
    Duration::from_nanos(u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
}
