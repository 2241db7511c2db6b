//! In-memory ports for unit tests.
//!
//! [`MockPort`] replays a fixed byte script and records everything written.
//! [`SimulatedDevice`] behaves like a ROM bootloader: it parses packets,
//! answers ACK/NACK, keeps a status register and a flash array.

use std::collections::{HashSet, VecDeque};
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crate::error::Result;
use crate::port::Port;
use crate::protocol::frame::{ACK, Command, NACK, Status, checksum};

/// Upper bound on how long an empty mock read pretends to wait.
const MAX_IDLE_SLEEP: Duration = Duration::from_millis(5);

/// Scripted port: reads pop from a queue, writes are recorded.
pub(crate) struct MockPort {
    pub read_buf: VecDeque<u8>,
    pub write_buf: Vec<u8>,
    pub closed: bool,
    timeout: Duration,
}

impl MockPort {
    pub fn new(response: &[u8]) -> Self {
        Self {
            read_buf: response.iter().copied().collect(),
            write_buf: Vec::new(),
            closed: false,
            timeout: Duration::from_millis(20),
        }
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.read_buf.is_empty() {
            thread::sleep(self.timeout.min(MAX_IDLE_SLEEP));
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.read_buf.len());
        for b in buf.iter_mut().take(n) {
            *b = self.read_buf.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn baud_rate(&self) -> u32 {
        115200
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// A command the simulated bootloader accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Logged {
    pub command: Command,
    pub args: Vec<u8>,
}

impl Logged {
    pub fn u32_arg(&self, index: usize) -> u32 {
        let at = index * 4;
        u32::from_be_bytes([
            self.args[at],
            self.args[at + 1],
            self.args[at + 2],
            self.args[at + 3],
        ])
    }
}

/// Behavioural model of the ROM serial bootloader.
pub(crate) struct SimulatedDevice {
    pub baud_rate: u32,
    /// Whether 0x55 0x55 has been received (or the test starts synced).
    pub synced: bool,
    /// Whether the device answers the autobaud probe at all.
    pub answers_autobaud: bool,
    pub chip_id: u32,
    pub page_size: u32,
    pub flash: Vec<u8>,
    pub log: Vec<Logged>,
    pub host_acks: usize,
    pub host_nacks: usize,
    /// Incremented on every [`Port::close`]; shareable across devices.
    pub closes: Arc<AtomicUsize>,
    /// Sector addresses whose erase reports FLASH_FAIL.
    pub fail_erase_at: HashSet<u32>,
    /// 0-based SEND_DATA index that reports FLASH_FAIL.
    pub fail_send_data_at: Option<usize>,
    /// Status DOWNLOAD reports.
    pub download_status: Status,
    /// Stop answering after this many packets.
    pub go_silent_after: Option<usize>,
    status: Status,
    awaiting_host_ack: bool,
    probe_count: usize,
    rx: Vec<u8>,
    tx: VecDeque<u8>,
    write_addr: u32,
    write_remaining: u32,
    send_data_count: usize,
    timeout: Duration,
}

impl SimulatedDevice {
    pub fn new(flash_size: u32, page_size: u32) -> Self {
        Self {
            baud_rate: 115200,
            synced: true,
            answers_autobaud: true,
            chip_id: 0xB99A_402F,
            page_size,
            flash: vec![0xFF; flash_size as usize],
            log: Vec::new(),
            host_acks: 0,
            host_nacks: 0,
            closes: Arc::new(AtomicUsize::new(0)),
            fail_erase_at: HashSet::new(),
            fail_send_data_at: None,
            download_status: Status::Success,
            go_silent_after: None,
            status: Status::Success,
            awaiting_host_ack: false,
            probe_count: 0,
            rx: Vec::new(),
            tx: VecDeque::new(),
            write_addr: 0,
            write_remaining: 0,
            send_data_count: 0,
            timeout: Duration::from_millis(20),
        }
    }

    /// Device that still needs the 0x55 0x55 probe.
    pub fn unsynced(baud_rate: u32, answers_autobaud: bool) -> Self {
        let mut dev = Self::new(0x1000, 0x1000);
        dev.baud_rate = baud_rate;
        dev.synced = false;
        dev.answers_autobaud = answers_autobaud;
        dev
    }

    /// Count closes on `counter` instead of a private one.
    pub fn counting_closes(mut self, counter: &Arc<AtomicUsize>) -> Self {
        self.closes = Arc::clone(counter);
        self
    }

    pub fn commands(&self) -> Vec<Command> {
        self.log
            .iter()
            .map(|l| l.command)
            .collect()
    }

    pub fn logged(&self, command: Command) -> Vec<&Logged> {
        self.log
            .iter()
            .filter(|l| l.command == command)
            .collect()
    }

    fn ack(&mut self) {
        // CC26xx ROMs emit a zero byte ahead of the ACK.
        self.tx.push_back(0x00);
        self.tx.push_back(ACK);
    }

    fn respond(&mut self, payload: &[u8]) {
        self.tx.push_back((payload.len() + 2) as u8);
        self.tx.push_back(checksum(payload));
        self.tx.extend(payload.iter().copied());
        self.awaiting_host_ack = true;
    }

    fn process(&mut self) {
        loop {
            if self.rx.is_empty() {
                return;
            }

            if !self.synced {
                let b = self.rx.remove(0);
                if b == 0x55 {
                    self.probe_count += 1;
                    if self.probe_count >= 2 && self.answers_autobaud {
                        self.synced = true;
                        self.ack();
                    }
                }
                continue;
            }

            if self.awaiting_host_ack {
                if self.rx.len() < 2 {
                    return;
                }
                let echo: Vec<u8> = self.rx.drain(..2).collect();
                match echo[1] {
                    ACK => self.host_acks += 1,
                    NACK => self.host_nacks += 1,
                    _ => {},
                }
                self.awaiting_host_ack = false;
                continue;
            }

            let size = usize::from(self.rx[0]);
            if size < 3 {
                self.rx.remove(0);
                continue;
            }
            if self.rx.len() < size {
                return;
            }
            let packet: Vec<u8> = self.rx.drain(..size).collect();
            self.handle_packet(&packet);
        }
    }

    fn handle_packet(&mut self, packet: &[u8]) {
        if let Some(limit) = self.go_silent_after {
            if self.log.len() >= limit {
                return;
            }
        }

        let payload = &packet[2..];
        if checksum(payload) != packet[1] {
            self.tx.push_back(0x00);
            self.tx.push_back(NACK);
            return;
        }
        let Some(command) = Command::from_opcode(payload[0]) else {
            self.ack();
            self.status = Status::UnknownCmd;
            return;
        };
        let args = payload[1..].to_vec();
        self.log.push(Logged {
            command,
            args: args.clone(),
        });
        self.ack();

        let be = |at: usize| u32::from_be_bytes([args[at], args[at + 1], args[at + 2], args[at + 3]]);

        match command {
            Command::Ping => {},
            Command::GetStatus => {
                let raw = self.status.raw();
                self.respond(&[raw]);
                return;
            },
            Command::GetChipId => {
                let id = self.chip_id.to_le_bytes();
                self.respond(&id);
                return;
            },
            Command::Crc32 => {
                let (addr, len) = (be(0) as usize, be(4) as usize);
                let crc = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC).checksum(&self.flash[addr..addr + len]);
                self.respond(&crc.to_be_bytes());
                self.status = Status::Success;
                return;
            },
            Command::Reset => {},
            Command::SectorErase => {
                let addr = be(0);
                self.status = if addr % self.page_size != 0 || addr as usize >= self.flash.len() {
                    Status::InvalidAddr
                } else if self.fail_erase_at.contains(&addr) {
                    Status::FlashFail
                } else {
                    let start = addr as usize;
                    let end = start + self.page_size as usize;
                    self.flash[start..end].fill(0xFF);
                    Status::Success
                };
                return;
            },
            Command::Download => {
                self.write_addr = be(0);
                self.write_remaining = be(4);
                self.status = self.download_status;
                return;
            },
            Command::SendData => {
                let index = self.send_data_count;
                self.send_data_count += 1;
                let len = args.len() as u32;
                self.status = if self.fail_send_data_at == Some(index) {
                    Status::FlashFail
                } else if len > self.write_remaining {
                    Status::InvalidCmd
                } else {
                    let start = self.write_addr as usize;
                    for (i, b) in args.iter().enumerate() {
                        // Flash can only clear bits.
                        self.flash[start + i] &= *b;
                    }
                    self.write_addr += len;
                    self.write_remaining -= len;
                    Status::Success
                };
                return;
            },
        }
        self.status = Status::Success;
    }
}

impl Read for SimulatedDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.tx.is_empty() {
            thread::sleep(self.timeout.min(MAX_IDLE_SLEEP));
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.tx.len());
        for b in buf.iter_mut().take(n) {
            *b = self.tx.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for SimulatedDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.rx.extend_from_slice(buf);
        self.process();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for SimulatedDevice {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn name(&self) -> &str {
        "simulated"
    }

    fn close(&mut self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
