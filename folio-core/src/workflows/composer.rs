//! Binds job parameters into a deep-copied node-graph template.
//!
//! Templates are shared; every compose clones before mutating so no job
//! ever sees another job's bindings.

use serde_json::{Value, json};

use crate::domain::JobRecord;

/// SVD renders at a fixed long edge of 1024 with the short edge snapped
/// down to a multiple of 64 inside [320, 576].
pub fn svd_dimensions(source_width: i64, source_height: i64) -> (i64, i64) {
    let aspect = source_width as f64 / source_height as f64;
    if aspect >= 1.0 {
        let height = ((1024.0 / aspect) as i64 / 64) * 64;
        (1024, height.clamp(320, 576))
    } else {
        let width = ((1024.0 * aspect) as i64 / 64) * 64;
        (width.clamp(320, 576), 1024)
    }
}

/// Frame budget for an animation; the video model caps at 25 frames.
pub fn frame_count(duration_seconds: f64, fps: i64) -> i64 {
    ((duration_seconds * fps as f64) as i64).min(25)
}

fn node_class<'a>(graph: &'a Value, node: &str) -> Option<&'a str> {
    graph.get(node)?.get("class_type")?.as_str()
}

fn set_input(graph: &mut Value, node: &str, field: &str, value: Value) {
    if let Some(inputs) = graph
        .get_mut(node)
        .and_then(|n| n.get_mut("inputs"))
        .and_then(Value::as_object_mut)
    {
        inputs.insert(field.to_string(), value);
    }
}

/// Sampler, prompt, and model bindings shared by the still-image graphs.
fn bind_sampling(graph: &mut Value, job: &JobRecord) {
    set_input(graph, "6", "text", json!(job.prompt));
    set_input(
        graph,
        "7",
        "text",
        json!(job.negative_prompt.clone().unwrap_or_default()),
    );

    if node_class(graph, "3") == Some("KSampler") {
        set_input(graph, "3", "seed", json!(job.seed));
        set_input(graph, "3", "steps", json!(job.steps));
        set_input(graph, "3", "cfg", json!(job.cfg_scale));
        set_input(graph, "3", "sampler_name", json!(job.sampler));
    }

    if let Some(model) = &job.model_filename {
        if node_class(graph, "4") == Some("CheckpointLoaderSimple") {
            set_input(graph, "4", "ckpt_name", json!(model));
        }
    }

    if let Some(lora) = &job.lora_filename {
        let lora_node = graph.as_object().and_then(|nodes| {
            nodes
                .iter()
                .find(|(_, node)| {
                    node.get("class_type")
                        .and_then(Value::as_str)
                        .is_some_and(|class| class.contains("LoraLoader"))
                })
                .map(|(id, _)| id.clone())
        });
        if let Some(node) = lora_node {
            set_input(graph, &node, "lora_name", json!(lora));
        }
    }
}

/// Text-to-image: bind sampling plus the empty-latent dimensions.
pub fn compose_txt2img(template: &Value, job: &JobRecord) -> Value {
    let mut graph = template.clone();
    bind_sampling(&mut graph, job);
    set_input(&mut graph, "5", "width", json!(job.width));
    set_input(&mut graph, "5", "height", json!(job.height));
    graph
}

/// Inpaint: source at "1", mask at "2", inpaint encoder at "10".
pub fn compose_inpaint(
    template: &Value,
    job: &JobRecord,
    source_name: &str,
    mask_name: &str,
) -> Value {
    let mut graph = template.clone();
    bind_sampling(&mut graph, job);
    set_input(&mut graph, "1", "image", json!(source_name));
    set_input(&mut graph, "2", "image", json!(mask_name));
    if let Some(grow) = job.grow_mask_by {
        set_input(&mut graph, "10", "grow_mask_by", json!(grow));
    }
    if let Some(denoise) = job.denoising_strength {
        set_input(&mut graph, "3", "denoise", json!(denoise));
    }
    graph
}

/// Outpaint: pad node "2" carries the margins and feathering.
pub fn compose_outpaint(template: &Value, job: &JobRecord, source_name: &str) -> Value {
    let mut graph = template.clone();
    bind_sampling(&mut graph, job);
    set_input(&mut graph, "1", "image", json!(source_name));
    set_input(&mut graph, "2", "left", json!(job.outpaint_left.unwrap_or(0)));
    set_input(&mut graph, "2", "top", json!(job.outpaint_top.unwrap_or(0)));
    set_input(&mut graph, "2", "right", json!(job.outpaint_right.unwrap_or(0)));
    set_input(
        &mut graph,
        "2",
        "bottom",
        json!(job.outpaint_bottom.unwrap_or(0)),
    );
    if let Some(feather) = job.outpaint_feather {
        set_input(&mut graph, "2", "feathering", json!(feather));
    }
    if let Some(grow) = job.grow_mask_by {
        set_input(&mut graph, "10", "grow_mask_by", json!(grow));
    }
    if let Some(denoise) = job.denoising_strength {
        set_input(&mut graph, "3", "denoise", json!(denoise));
    }
    graph
}

/// Upscale: model loader at "2", sharpen at "4"; no sampler involved.
pub fn compose_upscale(template: &Value, job: &JobRecord, source_name: &str) -> Value {
    let mut graph = template.clone();
    set_input(&mut graph, "1", "image", json!(source_name));
    if let Some(model) = &job.upscale_model {
        set_input(&mut graph, "2", "model_name", json!(model));
    }
    if let Some(alpha) = job.sharpen_amount {
        set_input(&mut graph, "4", "alpha", json!(alpha));
    }
    graph
}

/// Animation: the video-diffusion node "3" gets the computed dimensions
/// and frame budget; the sampler at "4" gets the seed.
pub fn compose_svd(
    template: &Value,
    job: &JobRecord,
    source_name: &str,
    source_width: i64,
    source_height: i64,
) -> Value {
    let mut graph = template.clone();
    let fps = job.fps.unwrap_or(8);
    let duration = job.duration_seconds.unwrap_or(3.0);
    let (width, height) = svd_dimensions(source_width, source_height);

    set_input(&mut graph, "1", "image", json!(source_name));
    set_input(&mut graph, "3", "width", json!(width));
    set_input(&mut graph, "3", "height", json!(height));
    set_input(&mut graph, "3", "video_frames", json!(frame_count(duration, fps)));
    set_input(&mut graph, "3", "fps", json!(fps));
    set_input(
        &mut graph,
        "3",
        "motion_bucket_id",
        json!(job.motion_bucket_id.unwrap_or(127)),
    );
    set_input(&mut graph, "3", "augmentation_level", json!(0.0));
    set_input(&mut graph, "4", "seed", json!(job.seed));
    graph
}
