//! CH341 I2C stream command bytes
//!
//! Most I2C traffic goes through the vendor's `CH341StreamI2C`, but the bus
//! scan needs per-address START / ACK-check / STOP sequences, which the
//! vendor library only offers as raw command packets pushed through
//! `CH341WriteData` and `CH341WriteRead`.

/// Size of one command packet on the bulk endpoint
pub const CH341_PACKET_LENGTH: usize = 32;

/// I2C stream command prefix
pub const CH341A_CMD_I2C_STREAM: u8 = 0xAA;

/// Generate a START condition
pub const CH341A_CMD_I2C_STM_STA: u8 = 0x74;
/// Generate a STOP condition
pub const CH341A_CMD_I2C_STM_STO: u8 = 0x75;
/// Output bytes; low 6 bits are the count, 0 means one byte plus ACK report
pub const CH341A_CMD_I2C_STM_OUT: u8 = 0x80;
/// End of command packet
pub const CH341A_CMD_I2C_STM_END: u8 = 0x00;

/// Bit set in an ACK report byte when the target did not acknowledge
pub const I2C_ACK_NACK_BIT: u8 = 0x80;

/// Packet generating a START condition
pub fn start_packet() -> [u8; 3] {
    [
        CH341A_CMD_I2C_STREAM,
        CH341A_CMD_I2C_STM_STA,
        CH341A_CMD_I2C_STM_END,
    ]
}

/// Packet generating a STOP condition
pub fn stop_packet() -> [u8; 3] {
    [
        CH341A_CMD_I2C_STREAM,
        CH341A_CMD_I2C_STM_STO,
        CH341A_CMD_I2C_STM_END,
    ]
}

/// Packet clocking out one byte and reporting the ACK bit
pub fn out_byte_check_ack_packet(byte: u8) -> [u8; 4] {
    [
        CH341A_CMD_I2C_STREAM,
        CH341A_CMD_I2C_STM_OUT,
        byte,
        CH341A_CMD_I2C_STM_END,
    ]
}

/// Decode the ACK report returned for [`out_byte_check_ack_packet`]
///
/// The device appends one status byte per checked output; the last one
/// belongs to our byte. Returns `None` for an empty response.
pub fn parse_ack(response: &[u8]) -> Option<bool> {
    response.last().map(|&b| b & I2C_ACK_NACK_BIT == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packets() {
        assert_eq!(start_packet(), [0xAA, 0x74, 0x00]);
        assert_eq!(stop_packet(), [0xAA, 0x75, 0x00]);
        assert_eq!(out_byte_check_ack_packet(0xD0), [0xAA, 0x80, 0xD0, 0x00]);
    }

    #[test]
    fn test_parse_ack() {
        assert_eq!(parse_ack(&[0x00]), Some(true));
        assert_eq!(parse_ack(&[0x00, 0x80]), Some(false));
        assert_eq!(parse_ack(&[]), None);
    }
}
