// SPDX-License-Identifier: CEPL-1.0
//! Formatting for what drivers report about themselves.

/// Decodes a fixed-size UTF-16 name buffer (DXGI adapter descriptions).
pub fn utf16_until_nul(buf: &[u16]) -> String {
    let end = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..end]).trim().to_string()
}

/// `D3D_FEATURE_LEVEL_11_1` is `0xb100`: major in bits 12..16, minor in 8..12.
pub fn feature_level_name(raw: u32) -> String {
    format!("{}_{}", (raw >> 12) & 0xf, (raw >> 8) & 0xf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_at_first_nul() {
        let mut buf = [0u16; 16];
        for (i, c) in "Radeon RX".encode_utf16().enumerate() {
            buf[i] = c;
        }
        assert_eq!(utf16_until_nul(&buf), "Radeon RX");
    }

    #[test]
    fn full_buffer_without_nul() {
        let buf: Vec<u16> = "WARP ".encode_utf16().collect();
        assert_eq!(utf16_until_nul(&buf), "WARP");
    }

    #[test]
    fn feature_levels() {
        assert_eq!(feature_level_name(0xb000), "11_0");
        assert_eq!(feature_level_name(0xb100), "11_1");
        assert_eq!(feature_level_name(0xc200), "12_2");
        assert_eq!(feature_level_name(0x9300), "9_3");
    }
}
