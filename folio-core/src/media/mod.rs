pub mod images;
pub mod video;

pub use images::{decode_mask_payload, image_dimensions, make_thumbnail, normalize_mask, placeholder_thumbnail};
pub use video::VideoEncoder;
