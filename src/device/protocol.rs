//! Wire protocol for the piezo waveform controller.
//!
//! Every packet is framed as `0xAA`, device address `0x01`, command,
//! subcommand, a reserved zero byte, the channel index, a payload, and a
//! trailing XOR checksum over the preceding bytes. Amplitude and bias use an
//! 11-byte packet with command `0x0B`; the combined waveform/frequency
//! command is a fixed 20-byte frame with the checksum at the last offset.
//!
//! Values travel as a 4-byte fixed-point encoding: the integer part split
//! high/low with the sign folded into bit 7 of the first byte, and the
//! fractional part scaled by 10000 split high/low.

use crate::sweep::WaveformKind;

/// Frame start byte
pub const FRAME_START: u8 = 0xAA;
/// Device address on the shared bus
pub const DEVICE_ADDRESS: u8 = 0x01;
/// Command group for amplitude/bias level settings
pub const CMD_LEVEL: u8 = 0x0B;
/// Subcommand selecting the amplitude register
pub const SUB_AMPLITUDE: u8 = 0x00;
/// Subcommand selecting the bias register
pub const SUB_BIAS: u8 = 0x01;
/// Command for the combined waveform/frequency frame
pub const CMD_WAVEFORM: u8 = 0x14;
/// Subcommand for the combined waveform/frequency frame
pub const SUB_WAVEFORM: u8 = 0x0F;
/// Length of the waveform/frequency frame
pub const WAVEFORM_FRAME_LEN: usize = 20;
/// Acknowledge byte sent by the controller after a configuration sequence
pub const ACK: u8 = 0x06;

/// Channels addressable on the controller. One configuration drives channel
/// 0 and zeroes the other two.
pub const CHANNEL_COUNT: u8 = 3;

fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Encode a value into the device's 4-byte fixed-point format.
///
/// The integer part is limited to 15 bits on the wire; out-of-range values
/// are truncated to that field width.
pub fn encode_value(value: f64) -> [u8; 4] {
    let magnitude = value.abs();
    let integer = magnitude.trunc() as u32;
    // +0.00001 guards against 0.9999... artifacts of the subtraction
    let fraction = ((magnitude - integer as f64 + 0.000_01) * 10_000.0) as u32;

    let mut high = ((integer >> 8) & 0x7F) as u8;
    if value < 0.0 {
        high |= 0x80;
    }

    [
        high,
        (integer & 0xFF) as u8,
        ((fraction >> 8) & 0xFF) as u8,
        (fraction & 0xFF) as u8,
    ]
}

fn level_packet(subcommand: u8, channel: u8, value: f64) -> Vec<u8> {
    let mut packet = vec![
        FRAME_START,
        DEVICE_ADDRESS,
        CMD_LEVEL,
        subcommand,
        0x00,
        channel,
    ];
    packet.extend_from_slice(&encode_value(value));
    packet.push(xor_checksum(&packet));
    packet
}

/// Packet setting the drive amplitude of one channel.
pub fn amplitude_packet(channel: u8, volts: f64) -> Vec<u8> {
    level_packet(SUB_AMPLITUDE, channel, volts)
}

/// Packet setting the DC bias of one channel.
pub fn bias_packet(channel: u8, volts: f64) -> Vec<u8> {
    level_packet(SUB_BIAS, channel, volts)
}

/// Fixed 20-byte frame selecting waveform shape and frequency for one
/// channel. The amplitude is repeated in the frame as the controller
/// expects.
pub fn waveform_frame(
    channel: u8,
    kind: WaveformKind,
    amplitude: f64,
    frequency: f64,
) -> [u8; WAVEFORM_FRAME_LEN] {
    let mut frame = [0u8; WAVEFORM_FRAME_LEN];
    frame[0] = FRAME_START;
    frame[1] = DEVICE_ADDRESS;
    frame[2] = CMD_WAVEFORM;
    frame[3] = SUB_WAVEFORM;
    frame[4] = 0x00;
    frame[5] = channel;
    frame[6] = kind.command_code();
    frame[7..11].copy_from_slice(&encode_value(amplitude));
    frame[11..15].copy_from_slice(&encode_value(frequency));
    frame[WAVEFORM_FRAME_LEN - 1] = xor_checksum(&frame);
    frame
}

/// Full packet sequence applying one sweep point.
///
/// Channel 0 receives the commanded amplitude, bias and waveform; channels 1
/// and 2 are zeroed so only the driven actuator moves.
pub fn configure_sequence(
    kind: WaveformKind,
    amplitude: f64,
    bias: f64,
    frequency: f64,
) -> Vec<Vec<u8>> {
    let mut packets = Vec::with_capacity(CHANNEL_COUNT as usize * 3);
    for channel in 0..CHANNEL_COUNT {
        let (v, b, f) = if channel == 0 {
            (amplitude, bias, frequency)
        } else {
            (0.0, 0.0, 0.0)
        };
        packets.push(amplitude_packet(channel, v));
        packets.push(bias_packet(channel, b));
        packets.push(waveform_frame(channel, kind, v, f).to_vec());
    }
    packets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_zero() {
        assert_eq!(encode_value(0.0), [0, 0, 0, 0]);
    }

    #[test]
    fn encode_positive_with_fraction() {
        // 2.5 -> integer 2, fraction 5000 = 0x1388
        assert_eq!(encode_value(2.5), [0x00, 0x02, 0x13, 0x88]);
    }

    #[test]
    fn encode_negative_sets_sign_bit() {
        // -1.25 -> integer 1, fraction 2500 = 0x09C4, sign in bit 7
        assert_eq!(encode_value(-1.25), [0x80, 0x01, 0x09, 0xC4]);
    }

    #[test]
    fn encode_splits_integer_part() {
        // 300 = 0x012C
        assert_eq!(encode_value(300.0), [0x01, 0x2C, 0x00, 0x00]);
    }

    #[test]
    fn level_packet_layout() {
        let packet = amplitude_packet(0, 2.5);
        assert_eq!(packet.len(), 11);
        assert_eq!(packet[0], FRAME_START);
        assert_eq!(packet[1], DEVICE_ADDRESS);
        assert_eq!(packet[2], CMD_LEVEL);
        assert_eq!(packet[3], SUB_AMPLITUDE);
        assert_eq!(packet[5], 0);
        // trailing checksum makes the whole packet XOR to zero
        assert_eq!(packet.iter().fold(0u8, |acc, b| acc ^ b), 0);
    }

    #[test]
    fn bias_packet_uses_bias_subcommand() {
        let packet = bias_packet(1, -0.5);
        assert_eq!(packet[3], SUB_BIAS);
        assert_eq!(packet[5], 1);
        assert_eq!(packet.iter().fold(0u8, |acc, b| acc ^ b), 0);
    }

    #[test]
    fn waveform_frame_layout() {
        let frame = waveform_frame(0, WaveformKind::Sine, 1.0, 50.0);
        assert_eq!(frame.len(), WAVEFORM_FRAME_LEN);
        assert_eq!(frame[2], CMD_WAVEFORM);
        assert_eq!(frame[3], SUB_WAVEFORM);
        assert_eq!(frame[6], b'Z');
        assert_eq!(&frame[7..11], &encode_value(1.0));
        assert_eq!(&frame[11..15], &encode_value(50.0));
        // checksum at the last offset covers the zeroed checksum slot
        assert_eq!(frame.iter().fold(0u8, |acc, b| acc ^ b), 0);
    }

    #[test]
    fn configure_sequence_zeroes_idle_channels() {
        let packets = configure_sequence(WaveformKind::Square, 3.0, 1.0, 20.0);
        assert_eq!(packets.len(), 9);
        // channel 0 carries the commanded amplitude
        assert_eq!(&packets[0][6..10], &encode_value(3.0));
        // channels 1 and 2 are zeroed
        assert_eq!(&packets[3][6..10], &encode_value(0.0));
        assert_eq!(&packets[6][6..10], &encode_value(0.0));
        // every third packet is a waveform frame for its channel
        assert_eq!(packets[2][5], 0);
        assert_eq!(packets[5][5], 1);
        assert_eq!(packets[8][5], 2);
    }
}
