pub const FRAME_LEN: usize = 4;

const AXIS_SCALE: f32 = 32767.0;

/// Packs one steering/throttle sample into the 4-byte control frame: two
/// little-endian i16 axes, steering first.
pub fn encode_sample(steering: f32, throttle: f32) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[0..2].copy_from_slice(&scale_axis(steering).to_le_bytes());
    frame[2..4].copy_from_slice(&scale_axis(throttle).to_le_bytes());
    frame
}

fn scale_axis(value: f32) -> i16 {
    (value.clamp(-1.0, 1.0) * AXIS_SCALE).round() as i16
}
