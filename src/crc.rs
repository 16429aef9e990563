//! 4-bit checksum carried in the low nibble of the last byte of every
//! BITalino packet (status replies and acquisition frames).

/// Compute the running CRC over `data`, bit by bit, most significant bit first.
///
/// Only the low nibble is transmitted by the device; the full register is
/// returned so callers can mask it themselves.
pub fn crc(data: &[u8]) -> u8 {
    checksum(data.iter().copied())
}

/// Validate a packet whose last byte carries the checksum in its low nibble.
///
/// The nibble is masked to zero before computing, as the device does.
pub fn verify_packet(packet: &[u8]) -> bool {
    let Some((&last, body)) = packet.split_last() else {
        return false;
    };
    let received = last & 0x0F;
    let computed = checksum(body.iter().copied().chain(std::iter::once(last & 0xF0)));
    received == computed & 0x0F
}

fn checksum(bytes: impl Iterator<Item = u8>) -> u8 {
    let mut crc = 0u8;
    for byte in bytes {
        for bit in (0..8).rev() {
            crc <<= 1;
            if (crc & 0x10) != 0 {
                crc ^= 0x03;
            }
            crc ^= (byte >> bit) & 0x01;
        }
    }
    crc
}

#[cfg(test)]
pub(crate) fn seal(mut packet: Vec<u8>) -> Vec<u8> {
    let last = packet.len() - 1;
    packet[last] &= 0xF0;
    packet[last] |= crc(&packet) & 0x0F;
    packet
}
