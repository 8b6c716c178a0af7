//! Builtin node-graph templates seeded into the workflow store at startup.
//!
//! Node ids are contractual: the composer binds parameters onto well-known
//! ids (sampler at "3", prompts at "6"/"7", source image at "1", ...), so
//! custom templates are expected to follow the same numbering.

use once_cell::sync::Lazy;
use serde_json::{Value, json};

use crate::domain::JobKind;

/// A builtin template definition, seeded insert-if-missing by name.
#[derive(Debug, Clone)]
pub struct BuiltinWorkflow {
    pub name: &'static str,
    pub description: &'static str,
    pub category: &'static str,
    pub graph: Value,
}

static TXT2IMG_SDXL: Lazy<Value> = Lazy::new(|| {
    json!({
        "3": {
            "class_type": "KSampler",
            "inputs": {
                "cfg": 7.0,
                "denoise": 1.0,
                "latent_image": ["5", 0],
                "model": ["4", 0],
                "negative": ["7", 0],
                "positive": ["6", 0],
                "sampler_name": "euler",
                "scheduler": "normal",
                "seed": 0,
                "steps": 30
            }
        },
        "4": {
            "class_type": "CheckpointLoaderSimple",
            "inputs": { "ckpt_name": "model.safetensors" }
        },
        "5": {
            "class_type": "EmptyLatentImage",
            "inputs": { "batch_size": 1, "height": 1024, "width": 1024 }
        },
        "6": {
            "class_type": "CLIPTextEncode",
            "inputs": { "clip": ["4", 1], "text": "" }
        },
        "7": {
            "class_type": "CLIPTextEncode",
            "inputs": { "clip": ["4", 1], "text": "" }
        },
        "8": {
            "class_type": "VAEDecode",
            "inputs": { "samples": ["3", 0], "vae": ["4", 2] }
        },
        "9": {
            "class_type": "SaveImage",
            "inputs": { "filename_prefix": "folio", "images": ["8", 0] }
        }
    })
});

static TXT2IMG_SDXL_LORA: Lazy<Value> = Lazy::new(|| {
    json!({
        "3": {
            "class_type": "KSampler",
            "inputs": {
                "cfg": 7.0,
                "denoise": 1.0,
                "latent_image": ["5", 0],
                "model": ["10", 0],
                "negative": ["7", 0],
                "positive": ["6", 0],
                "sampler_name": "euler",
                "scheduler": "normal",
                "seed": 0,
                "steps": 30
            }
        },
        "4": {
            "class_type": "CheckpointLoaderSimple",
            "inputs": { "ckpt_name": "model.safetensors" }
        },
        "5": {
            "class_type": "EmptyLatentImage",
            "inputs": { "batch_size": 1, "height": 1024, "width": 1024 }
        },
        "6": {
            "class_type": "CLIPTextEncode",
            "inputs": { "clip": ["10", 1], "text": "" }
        },
        "7": {
            "class_type": "CLIPTextEncode",
            "inputs": { "clip": ["10", 1], "text": "" }
        },
        "8": {
            "class_type": "VAEDecode",
            "inputs": { "samples": ["3", 0], "vae": ["4", 2] }
        },
        "9": {
            "class_type": "SaveImage",
            "inputs": { "filename_prefix": "folio", "images": ["8", 0] }
        },
        "10": {
            "class_type": "LoraLoader",
            "inputs": {
                "clip": ["4", 1],
                "lora_name": "lora.safetensors",
                "model": ["4", 0],
                "strength_clip": 1.0,
                "strength_model": 1.0
            }
        }
    })
});

static INPAINT_SDXL: Lazy<Value> = Lazy::new(|| {
    json!({
        "1": {
            "class_type": "LoadImage",
            "inputs": { "image": "" }
        },
        "2": {
            "class_type": "LoadImage",
            "inputs": { "image": "" }
        },
        "3": {
            "class_type": "KSampler",
            "inputs": {
                "cfg": 7.0,
                "denoise": 0.85,
                "latent_image": ["10", 0],
                "model": ["4", 0],
                "negative": ["7", 0],
                "positive": ["6", 0],
                "sampler_name": "euler",
                "scheduler": "normal",
                "seed": 0,
                "steps": 30
            }
        },
        "4": {
            "class_type": "CheckpointLoaderSimple",
            "inputs": { "ckpt_name": "model.safetensors" }
        },
        "6": {
            "class_type": "CLIPTextEncode",
            "inputs": { "clip": ["4", 1], "text": "" }
        },
        "7": {
            "class_type": "CLIPTextEncode",
            "inputs": { "clip": ["4", 1], "text": "" }
        },
        "8": {
            "class_type": "VAEDecode",
            "inputs": { "samples": ["3", 0], "vae": ["4", 2] }
        },
        "9": {
            "class_type": "SaveImage",
            "inputs": { "filename_prefix": "folio", "images": ["8", 0] }
        },
        "10": {
            "class_type": "VAEEncodeForInpaint",
            "inputs": {
                "grow_mask_by": 6,
                "mask": ["2", 1],
                "pixels": ["1", 0],
                "vae": ["4", 2]
            }
        }
    })
});

static OUTPAINT_SDXL: Lazy<Value> = Lazy::new(|| {
    json!({
        "1": {
            "class_type": "LoadImage",
            "inputs": { "image": "" }
        },
        "2": {
            "class_type": "ImagePadForOutpaint",
            "inputs": {
                "image": ["1", 0],
                "left": 0,
                "top": 0,
                "right": 0,
                "bottom": 0,
                "feathering": 40
            }
        },
        "3": {
            "class_type": "KSampler",
            "inputs": {
                "cfg": 7.0,
                "denoise": 1.0,
                "latent_image": ["10", 0],
                "model": ["4", 0],
                "negative": ["7", 0],
                "positive": ["6", 0],
                "sampler_name": "euler",
                "scheduler": "normal",
                "seed": 0,
                "steps": 30
            }
        },
        "4": {
            "class_type": "CheckpointLoaderSimple",
            "inputs": { "ckpt_name": "model.safetensors" }
        },
        "6": {
            "class_type": "CLIPTextEncode",
            "inputs": { "clip": ["4", 1], "text": "" }
        },
        "7": {
            "class_type": "CLIPTextEncode",
            "inputs": { "clip": ["4", 1], "text": "" }
        },
        "8": {
            "class_type": "VAEDecode",
            "inputs": { "samples": ["3", 0], "vae": ["4", 2] }
        },
        "9": {
            "class_type": "SaveImage",
            "inputs": { "filename_prefix": "folio", "images": ["8", 0] }
        },
        "10": {
            "class_type": "VAEEncodeForInpaint",
            "inputs": {
                "grow_mask_by": 8,
                "mask": ["2", 1],
                "pixels": ["2", 0],
                "vae": ["4", 2]
            }
        }
    })
});

static UPSCALE_ESRGAN: Lazy<Value> = Lazy::new(|| {
    json!({
        "1": {
            "class_type": "LoadImage",
            "inputs": { "image": "" }
        },
        "2": {
            "class_type": "UpscaleModelLoader",
            "inputs": { "model_name": "RealESRGAN_x4plus.pth" }
        },
        "3": {
            "class_type": "ImageUpscaleWithModel",
            "inputs": { "image": ["1", 0], "upscale_model": ["2", 0] }
        },
        "4": {
            "class_type": "ImageSharpen",
            "inputs": {
                "alpha": 0.2,
                "image": ["3", 0],
                "sharpen_radius": 1,
                "sigma": 1.0
            }
        },
        "9": {
            "class_type": "SaveImage",
            "inputs": { "filename_prefix": "folio", "images": ["4", 0] }
        }
    })
});

static ANIMATE_SVD: Lazy<Value> = Lazy::new(|| {
    json!({
        "1": {
            "class_type": "LoadImage",
            "inputs": { "image": "" }
        },
        "2": {
            "class_type": "ImageOnlyCheckpointLoader",
            "inputs": { "ckpt_name": "svd_xt.safetensors" }
        },
        "3": {
            "class_type": "SVD_img2vid_Conditioning",
            "inputs": {
                "augmentation_level": 0.0,
                "clip_vision": ["2", 1],
                "fps": 8,
                "height": 576,
                "init_image": ["1", 0],
                "motion_bucket_id": 127,
                "vae": ["2", 2],
                "video_frames": 25,
                "width": 1024
            }
        },
        "4": {
            "class_type": "KSampler",
            "inputs": {
                "cfg": 2.5,
                "denoise": 1.0,
                "latent_image": ["3", 2],
                "model": ["2", 0],
                "negative": ["3", 1],
                "positive": ["3", 0],
                "sampler_name": "euler",
                "scheduler": "karras",
                "seed": 0,
                "steps": 20
            }
        },
        "8": {
            "class_type": "VAEDecode",
            "inputs": { "samples": ["4", 0], "vae": ["2", 2] }
        },
        "9": {
            "class_type": "SaveImage",
            "inputs": { "filename_prefix": "folio_anim", "images": ["8", 0] }
        }
    })
});

static BUILTINS: Lazy<Vec<BuiltinWorkflow>> = Lazy::new(|| {
    vec![
        BuiltinWorkflow {
            name: "SDXL Text to Image",
            description: "Basic text-to-image generation using SDXL checkpoints.",
            category: "txt2img",
            graph: TXT2IMG_SDXL.clone(),
        },
        BuiltinWorkflow {
            name: "SDXL Text to Image + LoRA",
            description: "Text-to-image with LoRA support for styles and characters.",
            category: "txt2img",
            graph: TXT2IMG_SDXL_LORA.clone(),
        },
        BuiltinWorkflow {
            name: "SDXL Inpaint",
            description: "Regenerate masked regions of an existing image.",
            category: "inpaint",
            graph: INPAINT_SDXL.clone(),
        },
        BuiltinWorkflow {
            name: "SDXL Outpaint",
            description: "Extend an image past its borders with feathered padding.",
            category: "outpaint",
            graph: OUTPAINT_SDXL.clone(),
        },
        BuiltinWorkflow {
            name: "ESRGAN Upscale",
            description: "Model-based upscale with optional sharpening.",
            category: "upscale",
            graph: UPSCALE_ESRGAN.clone(),
        },
        BuiltinWorkflow {
            name: "SVD Animate",
            description: "Animate a still image with Stable Video Diffusion.",
            category: "animate",
            graph: ANIMATE_SVD.clone(),
        },
    ]
});

pub fn builtin_workflows() -> &'static [BuiltinWorkflow] {
    &BUILTINS
}

/// The default template for a job kind. Txt2img jobs with a LoRA selected
/// route through the LoRA graph so the loader node exists to bind.
pub fn default_graph(kind: JobKind, with_lora: bool) -> Value {
    match kind {
        JobKind::Txt2Img if with_lora => TXT2IMG_SDXL_LORA.clone(),
        JobKind::Txt2Img => TXT2IMG_SDXL.clone(),
        JobKind::Inpaint => INPAINT_SDXL.clone(),
        JobKind::Outpaint => OUTPAINT_SDXL.clone(),
        JobKind::Upscale => UPSCALE_ESRGAN.clone(),
        JobKind::Animate => ANIMATE_SVD.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_is_a_node_map() {
        for builtin in builtin_workflows() {
            assert!(
                builtin.graph.is_object(),
                "{} is not an object",
                builtin.name
            );
            assert!(
                builtin
                    .graph
                    .as_object()
                    .unwrap()
                    .values()
                    .all(|node| node.get("class_type").is_some()),
                "{} has a node without class_type",
                builtin.name
            );
        }
    }

    #[test]
    fn default_graph_routes_lora_requests() {
        let plain = default_graph(JobKind::Txt2Img, false);
        assert!(plain.get("10").is_none());

        let lora = default_graph(JobKind::Txt2Img, true);
        assert_eq!(lora["10"]["class_type"], "LoraLoader");
    }
}
