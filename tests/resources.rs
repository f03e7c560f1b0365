// End-to-end behaviour of the resource layer on the software device

use std::path::PathBuf;
use std::rc::Rc;

use glresource::{
    draw_arrays, Buffer, BufferKind, ComponentType, Device, DeviceError, Error, ImageCrateDecoder,
    MapAccess, MipmapFilter, PrimitiveMode, Program, SoftDevice, StageKind, StagePipeline,
    Texture2D, TextureFilter, TextureFormat, TextureWrap, VertexArray, VertexLayout,
};

const TRIANGLE: &str = "\
// shared header, ignored
#shader vertex
layout(location = 0) in vec3 position;
uniform mat4 projection;
void main() { gl_Position = projection * vec4(position, 1.0); }
#shader fragment
out vec4 color;
uniform vec3 tint;
void main() { color = vec4(tint, 1.0); }
";

fn temp_file(name: &str, contents: &[u8]) -> PathBuf {
    let path = std::env::temp_dir().join(format!("glresource_it_{}", name));
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn stride_matches_offsets_applied_to_device() {
    let soft = SoftDevice::new();
    let mut vao = VertexArray::new(soft.clone());
    vao.init().unwrap();
    vao.bind().unwrap();

    let mut layout = VertexLayout::new();
    layout
        .add_attribute(ComponentType::Float, 3, false)
        .add_attribute(ComponentType::Int, 1, false)
        .add_attribute(ComponentType::Float, 4, true)
        .add_attribute(ComponentType::Float, 2, false);
    assert_eq!(layout.stride(), (3 + 1 + 4 + 2) * 4);

    let vertices = [0u8; 40 * 3];
    let mut buffer = Buffer::new(soft.clone(), BufferKind::Vertex);
    buffer
        .init_with_layout(vertices.len(), Some(&vertices), &layout)
        .unwrap();

    let mut expected_offset = 0;
    for (slot, attribute) in layout.attributes().iter().enumerate() {
        let recorded = soft.attribute(vao.handle(), slot as u32).unwrap();
        assert_eq!(recorded.offset, expected_offset);
        assert_eq!(recorded.stride, layout.stride() as i32);
        assert_eq!(recorded.count, attribute.count as i32);
        assert!(recorded.enabled);
        expected_offset += attribute.byte_size() as i32;
    }
    assert_eq!(expected_offset, layout.stride() as i32);
}

#[test]
fn upload_round_trips_through_read_mapping() {
    let soft = SoftDevice::new();
    let data: Vec<u8> = (0..=255).collect();

    let mut buffer = Buffer::new(soft.clone(), BufferKind::ShaderStorage);
    buffer.init_with_data(&data).unwrap();
    {
        let mapping = buffer.map(MapAccess::Read).unwrap();
        assert_eq!(mapping.as_slice().unwrap(), &data[..]);
    }

    buffer.upload(16, &[0xAA; 8]).unwrap();
    let mapping = buffer.map(MapAccess::Read).unwrap();
    let bytes = mapping.as_slice().unwrap();
    assert_eq!(&bytes[16..24], &[0xAA; 8]);
    assert_eq!(&bytes[..16], &data[..16]);
    mapping.unmap().unwrap();
}

#[test]
fn teardown_is_idempotent_for_every_resource() {
    let soft = SoftDevice::new();

    let mut buffer = Buffer::new(soft.clone(), BufferKind::Vertex);
    let mut vao = VertexArray::new(soft.clone());
    let mut texture = Texture2D::new(soft.clone());
    let mut program = Program::new(soft.clone());
    buffer.free_mem();
    vao.free_mem();
    texture.free_mem();
    program.free_mem();

    buffer.init(16).unwrap();
    vao.init().unwrap();
    program.init_from_file(temp_file("teardown.glsl", TRIANGLE.as_bytes())).unwrap();
    for _ in 0..2 {
        buffer.free_mem();
        vao.free_mem();
        texture.free_mem();
        program.free_mem();
    }

    assert_eq!(soft.get_error(), glow::NO_ERROR);
    assert_eq!(soft.live_objects(), 0);
}

#[test]
fn pipeline_stages_hold_exact_spans() {
    let soft = SoftDevice::new();
    let path = temp_file("spans.glsl", TRIANGLE.as_bytes());
    let mut pipeline = StagePipeline::new(soft.clone());
    pipeline.init(&path).unwrap();
    assert_eq!(pipeline.len(), 2);

    let vertex = pipeline.get(StageKind::Vertex).unwrap();
    let fragment = pipeline.get(StageKind::Fragment).unwrap();
    let vertex_src = soft.shader_source_text(vertex.handle()).unwrap();
    let fragment_src = soft.shader_source_text(fragment.handle()).unwrap();
    assert!(vertex_src.starts_with("layout(location = 0)"));
    assert!(vertex_src.ends_with("1.0); }\n"));
    assert!(!vertex_src.contains("#shader"));
    assert!(fragment_src.starts_with("out vec4 color;"));
    assert!(!fragment_src.contains("#shader"));
}

#[test]
fn unknown_stage_names_the_token() {
    let soft = SoftDevice::new();
    let path = temp_file("geometry.glsl", b"#shader vertex\nvoid main() {}\n#shader geometry\nvoid main() {}\n");
    let mut pipeline = StagePipeline::new(soft.clone());
    let err = pipeline.init(&path).unwrap_err();
    assert!(err.to_string().contains("geometry"));
    assert!(matches!(err, Error::InFile { source, .. } if matches!(*source, Error::UnknownStage(_))));
}

#[test]
fn empty_pipeline_fails_only_at_link() {
    let soft = SoftDevice::new();
    let mut pipeline = StagePipeline::new(soft.clone());
    pipeline.init_from_source("void main() {}").unwrap();
    assert!(pipeline.is_empty());

    let mut program = Program::new(soft.clone());
    assert!(matches!(program.init(&pipeline), Err(Error::Link { .. })));
}

#[test]
fn link_failure_leaves_stages_usable() {
    let soft = SoftDevice::new();
    let mut pipeline = StagePipeline::new(soft.clone());
    pipeline
        .init_from_source("#shader fragment\nvoid main() {}\n")
        .unwrap();

    let mut program = Program::new(soft.clone());
    let err = program.init(&pipeline).unwrap_err();
    assert!(err.to_string().starts_with("Error while linking shaders code."));

    let fragment = pipeline.get(StageKind::Fragment).unwrap();
    assert!(soft.is_shader(fragment.handle()));
    assert_eq!(soft.attached_shaders(program.handle()), vec![fragment.handle()]);
}

#[test]
fn channel_gate_with_real_png() {
    let soft = SoftDevice::new();
    let rgba = std::env::temp_dir().join("glresource_it_rgba.png");
    image::RgbaImage::new(4, 4).save(&rgba).unwrap();

    let mut texture = Texture2D::new(soft.clone());
    let err = texture
        .init(&ImageCrateDecoder, &rgba, TextureFormat::Rgb, TextureWrap::Repeat, TextureFilter::Linear)
        .unwrap_err();
    assert_eq!(err.to_string(), "Unsupported data format. Channels count is: 4");
    assert_eq!(texture.handle(), 0);
    assert_eq!(soft.live_objects(), 0);

    let rgb = std::env::temp_dir().join("glresource_it_rgb.png");
    image::RgbImage::from_pixel(4, 2, image::Rgb([10, 20, 30])).save(&rgb).unwrap();
    texture
        .init_with_options(
            &ImageCrateDecoder,
            &rgb,
            TextureFormat::Rgb,
            &glresource::TextureOptions {
                mipmap_filter: MipmapFilter::Nearest,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!((texture.width(), texture.height(), texture.channels()), (4, 2, 3));
    let state = soft.texture(texture.handle()).unwrap();
    assert!(state.mipmapped);
    assert_eq!(&state.pixels[..3], &[10, 20, 30]);
}

#[test]
fn first_device_error_aborts_the_operation() {
    let soft = SoftDevice::new();
    let mut buffer = Buffer::new(soft.clone(), BufferKind::Vertex);
    // create, bind, then fail the storage allocation
    soft.fail_after(2, DeviceError::OutOfMemory);
    let err = buffer.init_with_data(&[1, 2, 3]).unwrap_err();
    assert_eq!(err.device_error(), Some(DeviceError::OutOfMemory));
    assert_eq!(err.status(), glow::OUT_OF_MEMORY as i32);

    // the name was handed out and the buffer was left bound
    assert_ne!(buffer.handle(), 0);
    assert_eq!(soft.bound_buffer(BufferKind::Vertex), buffer.handle());
    buffer.free_mem();
    assert_eq!(soft.live_objects(), 0);
}

#[test]
fn draw_after_full_setup() {
    let soft = SoftDevice::new();
    let device: Rc<dyn Device> = soft.clone();

    let mut program = Program::new(device.clone());
    program.init_from_file(temp_file("draw.glsl", TRIANGLE.as_bytes())).unwrap();

    let mut vao = VertexArray::new(device.clone());
    vao.init().unwrap();
    vao.bind().unwrap();
    let mut layout = VertexLayout::new();
    layout.add_attribute(ComponentType::Float, 3, false);
    let positions: [f32; 9] = [0.0, 0.5, 0.0, -0.5, -0.5, 0.0, 0.5, -0.5, 0.0];
    let mut buffer = Buffer::new(device.clone(), BufferKind::Vertex);
    buffer
        .init_with_layout(36, Some(bytemuck::cast_slice(&positions)), &layout)
        .unwrap();

    program.bind().unwrap();
    program.set_uniform("projection", glam::Mat4::IDENTITY).unwrap();
    program.set_uniform("tint", glam::Vec3::new(1.0, 0.0, 0.0)).unwrap();
    draw_arrays(&*device, PrimitiveMode::Triangles, 0, 3).unwrap();

    let calls = soft.draw_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!((calls[0].first, calls[0].count), (0, 3));
}
