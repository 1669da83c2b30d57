//! Endpoints
//!
//! The manager sits between two peers, each reached through a pair of
//! channels. The peer side of each pair is wrapped in a port object that hides
//! the hand-off protocol:
//!
//! - [`HostPort`]: the data source. Sends a block of playback input together
//!   with an empty capture output of the size it wants back, or a rate change.
//! - [`HardwarePort`]: the audio interface. Exchanges one captured frame for
//!   one frame to render, and advances the hardware tick counter.
//!
//! Blocks are moved, never shared: the manager owns a block from the moment it
//! receives it until it sends it back.

use crate::audio::types::Sample;
use crate::error::{Error, Result};
use crate::pipeline::clock::TickCounter;
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

const MANAGER: &str = "stream manager";

/// How host blocks are handed to the manager
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffMode {
    /// One block; every exchange waits for the manager to finish with it
    #[default]
    Rendezvous,

    /// Two alternating slots: the host fills one while the manager works on the
    /// other. Capture output arrives one exchange late.
    DoubleBuffer,
}

impl HandoffMode {
    /// Blocks in circulation
    fn depth(self) -> usize {
        match self {
            HandoffMode::Rendezvous => 1,
            HandoffMode::DoubleBuffer => 2,
        }
    }
}

/// One host hand-off slot
#[derive(Debug, Default)]
pub struct HostBlock {
    /// Slot index (alternates 0/1 under double buffering)
    pub slot: u8,

    /// Interleaved playback input at the host rate
    pub input: Vec<Sample>,

    /// Interleaved capture output at the host rate; its length is the request size
    pub output: Vec<Sample>,
}

/// Host → manager
#[derive(Debug)]
pub enum HostMessage {
    /// Renegotiated rate in Hz; ends the current epoch
    RateChange(u32),

    /// Input samples plus a request for capture output
    Block(HostBlock),
}

/// One hardware callback's worth of audio
#[derive(Debug, Default)]
pub struct HardwareFrame {
    /// One captured frame (capture channels)
    pub captured: Vec<Sample>,

    /// One frame to render (playback channels), filled by the manager
    pub render: Vec<Sample>,
}

/// Manager-side ends of the host channels
#[derive(Debug)]
pub struct HostLink {
    pub messages: Receiver<HostMessage>,
    pub returns: Sender<HostBlock>,
}

/// Manager-side ends of the hardware channels
#[derive(Debug)]
pub struct HardwareLink {
    pub frames: Receiver<HardwareFrame>,
    pub returns: Sender<HardwareFrame>,
}

/// Host-side port
#[derive(Debug)]
pub struct HostPort {
    mode: HandoffMode,
    playback_channels: usize,
    capture_channels: usize,
    messages: Sender<HostMessage>,
    returns: Receiver<HostBlock>,

    /// Slots the host currently owns
    free: Vec<HostBlock>,

    /// Slots currently owned by the manager
    in_flight: usize,
}

/// Create the host channel pair
pub fn host_channel(
    mode: HandoffMode,
    playback_channels: usize,
    capture_channels: usize,
    max_block_frames: usize,
) -> (HostPort, HostLink) {
    let (message_tx, message_rx) = match mode {
        HandoffMode::Rendezvous => bounded(0),
        HandoffMode::DoubleBuffer => bounded(1),
    };
    // Returns never block the manager under double buffering
    let (return_tx, return_rx) = match mode {
        HandoffMode::Rendezvous => bounded(0),
        HandoffMode::DoubleBuffer => bounded(2),
    };

    let free = (0..mode.depth())
        .rev()
        .map(|slot| HostBlock {
            slot: slot as u8,
            input: Vec::with_capacity(max_block_frames * playback_channels),
            output: Vec::with_capacity(max_block_frames * capture_channels),
        })
        .collect();

    (
        HostPort {
            mode,
            playback_channels,
            capture_channels,
            messages: message_tx,
            returns: return_rx,
            free,
            in_flight: 0,
        },
        HostLink {
            messages: message_rx,
            returns: return_tx,
        },
    )
}

impl HostPort {
    /// Hand over `input` and request `output.len()` capture samples.
    ///
    /// Under [`HandoffMode::Rendezvous`] `output` is filled from this exchange.
    /// Under [`HandoffMode::DoubleBuffer`] it is filled from the previous
    /// exchange (silence on the first).
    pub fn exchange(&mut self, input: &[Sample], output: &mut [Sample]) -> Result<()> {
        if input.len() % self.playback_channels != 0 || output.len() % self.capture_channels != 0 {
            return Err(Error::Protocol(format!(
                "host block of {} in / {} out samples is not whole frames",
                input.len(),
                output.len()
            )));
        }

        let mut block = match self.free.pop() {
            Some(block) => block,
            None => self.collect()?,
        };
        block.input.clear();
        block.input.extend_from_slice(input);
        block.output.clear();
        block.output.resize(output.len(), 0);

        self.messages
            .send(HostMessage::Block(block))
            .map_err(|_| Error::Disconnected(MANAGER))?;
        self.in_flight += 1;

        if self.in_flight == self.mode.depth() {
            let done = self.collect()?;
            let n = done.output.len().min(output.len());
            output[..n].copy_from_slice(&done.output[..n]);
            output[n..].fill(0);
            self.free.push(done);
        } else {
            output.fill(0);
        }

        Ok(())
    }

    /// Announce a new negotiated rate
    pub fn change_rate(&mut self, hz: u32) -> Result<()> {
        self.messages
            .send(HostMessage::RateChange(hz))
            .map_err(|_| Error::Disconnected(MANAGER))
    }

    pub fn mode(&self) -> HandoffMode {
        self.mode
    }

    /// Wait for the manager to release the oldest slot it holds
    fn collect(&mut self) -> Result<HostBlock> {
        let block = self.returns.recv().map_err(|_| Error::Disconnected(MANAGER))?;
        self.in_flight -= 1;
        Ok(block)
    }
}

/// Hardware-side port
#[derive(Debug)]
pub struct HardwarePort {
    playback_channels: usize,
    capture_channels: usize,
    ticks_per_frame: u32,
    clock: TickCounter,
    frames: Sender<HardwareFrame>,
    returns: Receiver<HardwareFrame>,
    frame: Option<HardwareFrame>,
}

/// Create the hardware channel pair; every transfer advances `clock` by `ticks_per_frame`
pub fn hardware_channel(
    playback_channels: usize,
    capture_channels: usize,
    ticks_per_frame: u32,
    clock: TickCounter,
) -> (HardwarePort, HardwareLink) {
    let (frame_tx, frame_rx) = bounded(0);
    let (return_tx, return_rx) = bounded(0);

    (
        HardwarePort {
            playback_channels,
            capture_channels,
            ticks_per_frame,
            clock,
            frames: frame_tx,
            returns: return_rx,
            frame: Some(HardwareFrame {
                captured: Vec::with_capacity(capture_channels),
                render: Vec::with_capacity(playback_channels),
            }),
        },
        HardwareLink {
            frames: frame_rx,
            returns: return_tx,
        },
    )
}

impl HardwarePort {
    /// One hardware frame period: deliver `captured`, receive the frame to render
    pub fn transfer(&mut self, captured: &[Sample], render: &mut [Sample]) -> Result<()> {
        if captured.len() != self.capture_channels || render.len() != self.playback_channels {
            return Err(Error::Protocol(format!(
                "hardware frame must be {} captured / {} rendered samples",
                self.capture_channels, self.playback_channels
            )));
        }

        let mut frame = self
            .frame
            .take()
            .ok_or_else(|| Error::Protocol("hardware frame lost".to_string()))?;
        frame.captured.clear();
        frame.captured.extend_from_slice(captured);
        frame.render.clear();
        frame.render.resize(self.playback_channels, 0);

        self.clock.advance(self.ticks_per_frame);

        self.frames
            .send(frame)
            .map_err(|_| Error::Disconnected(MANAGER))?;
        let frame = self
            .returns
            .recv()
            .map_err(|_| Error::Disconnected(MANAGER))?;

        render.copy_from_slice(&frame.render);
        self.frame = Some(frame);
        Ok(())
    }

    pub fn clock(&self) -> &TickCounter {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    /// Stand-in manager: echoes input into output, scaled by 10
    fn echo_host(link: HostLink) -> thread::JoinHandle<Vec<u32>> {
        thread::spawn(move || {
            let mut rates = Vec::new();
            while let Ok(message) = link.messages.recv() {
                match message {
                    HostMessage::RateChange(hz) => rates.push(hz),
                    HostMessage::Block(mut block) => {
                        for (out, &sample) in block.output.iter_mut().zip(&block.input) {
                            *out = sample * 10;
                        }
                        if link.returns.send(block).is_err() {
                            break;
                        }
                    }
                }
            }
            rates
        })
    }

    #[test]
    fn test_rendezvous_returns_same_exchange() {
        let (mut port, link) = host_channel(HandoffMode::Rendezvous, 1, 1, 4);
        let manager = echo_host(link);

        let mut output = [0; 4];
        port.exchange(&[1, 2, 3, 4], &mut output).unwrap();
        assert_eq!(output, [10, 20, 30, 40]);

        port.change_rate(96_000).unwrap();
        drop(port);
        assert_eq!(manager.join().unwrap(), vec![96_000]);
    }

    #[test]
    fn test_double_buffer_is_one_exchange_late() {
        let (mut port, link) = host_channel(HandoffMode::DoubleBuffer, 1, 1, 2);
        let manager = echo_host(link);

        let mut output = [0; 2];
        port.exchange(&[1, 2], &mut output).unwrap();
        assert_eq!(output, [0, 0]);

        port.exchange(&[3, 4], &mut output).unwrap();
        assert_eq!(output, [10, 20]);

        port.exchange(&[5, 6], &mut output).unwrap();
        assert_eq!(output, [30, 40]);

        drop(port);
        manager.join().unwrap();
    }

    #[test]
    fn test_double_buffer_slots_alternate() {
        let (mut port, link) = host_channel(HandoffMode::DoubleBuffer, 1, 1, 1);

        let seen = thread::spawn(move || {
            let mut slots = Vec::new();
            while let Ok(HostMessage::Block(block)) = link.messages.recv() {
                slots.push(block.slot);
                if link.returns.send(block).is_err() {
                    break;
                }
            }
            slots
        });

        let mut output = [0; 1];
        for i in 0..5 {
            port.exchange(&[i], &mut output).unwrap();
        }
        drop(port);
        assert_eq!(seen.join().unwrap(), vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn test_partial_frames_rejected() {
        let (mut port, _link) = host_channel(HandoffMode::Rendezvous, 2, 2, 4);
        let mut output = [0; 4];
        assert!(matches!(
            port.exchange(&[1, 2, 3], &mut output),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_hardware_transfer_advances_clock() {
        let clock = TickCounter::new();
        let (mut port, link) = hardware_channel(2, 1, 64, clock.clone());

        let manager = thread::spawn(move || {
            let mut frame = link.frames.recv().unwrap();
            frame.render.copy_from_slice(&[frame.captured[0], -frame.captured[0]]);
            link.returns.send(frame).unwrap();
        });

        let mut render = [0; 2];
        port.transfer(&[7], &mut render).unwrap();
        manager.join().unwrap();

        assert_eq!(render, [7, -7]);
        assert_eq!(clock.get(), 64);
    }

    #[test]
    fn test_manager_gone_is_reported() {
        let (mut port, link) = hardware_channel(1, 1, 64, TickCounter::new());
        drop(link);

        let mut render = [0; 1];
        assert!(matches!(
            port.transfer(&[1], &mut render),
            Err(Error::Disconnected(_))
        ));
    }
}
