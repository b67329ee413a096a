/// Return true if `buf` contains only zero bytes.
///
/// Based on Rusty Russell's memeqzero: probe the first 16 bytes, and
/// if they are zero compare the buffer with itself shifted by 16
/// bytes. Detecting a zero block this way is an order of magnitude
/// cheaper than computing its digest. The probe goes through a local
/// array so unaligned buffers are fine on any architecture.
/// See <http://rusty.ozlabs.org/?p=560> for more info.
pub(crate) fn is_zero(buf: &[u8]) -> bool {
    if buf.len() < 16 {
        return buf.iter().all(|&b| b == 0);
    }

    let mut head = [0u8; 16];
    head.copy_from_slice(&buf[..16]);
    if head != [0u8; 16] {
        return false;
    }

    buf[16..] == buf[..buf.len() - 16]
}
