/// IEEE 802.3 CRC-32 (reflected polynomial 0xEDB88320), as used for the 802.11 FCS
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xffff_ffffu32;
    for byte in data {
        crc ^= *byte as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xedb8_8320 & mask);
        }
    }
    !crc
}

/// Append the FCS (little endian) to a MAC frame
pub fn append_fcs(frame: &[u8]) -> Vec<u8> {
    let mut res = frame.to_vec();
    res.extend_from_slice(&crc32(frame).to_le_bytes());
    res
}

/// Whether the last four bytes of `psdu` are a valid FCS for the rest
pub fn check_fcs(psdu: &[u8]) -> bool {
    if psdu.len() < 4 {
        return false;
    }
    let (body, fcs) = psdu.split_at(psdu.len() - 4);
    crc32(body).to_le_bytes() == [fcs[0], fcs[1], fcs[2], fcs[3]]
}
