//! Turns the restricted ShaderToy dialect into a self-contained GLSL 450
//! fragment module.
//!
//! User programs define a single `mainImage(out vec4, in vec2)` entry and use
//! the standard uniform names (`iResolution`, `iTime`, `iChannel0`, ...). The
//! transpiler never fails; anything it lets through is reported by the
//! compiler backend.

/// Marks the start of the embedded user code in transpiled output.
const USER_CODE_BEGIN: &str = "// ---- multipass: user code ----";
/// Marks the end of the embedded user code in transpiled output.
const USER_CODE_END: &str = "// ---- multipass: entry point ----";

/// Separator inserted between the Common source and a pass's own source.
pub const COMMON_SEPARATOR: &str = "\n\n// ---- pass code ----\n\n";

/// Uniform names supplied by the preamble. Loose declarations of these in
/// user code are dropped.
const STANDARD_UNIFORMS: [&str; 13] = [
    "iResolution",
    "iTime",
    "iTimeDelta",
    "iFrame",
    "iMouse",
    "iDate",
    "iSampleRate",
    "iChannelTime",
    "iChannelResolution",
    "iChannel0",
    "iChannel1",
    "iChannel2",
    "iChannel3",
];

/// Legacy sampling calls and their canonical replacements.
const LEGACY_SAMPLING: [(&str, &str); 8] = [
    ("texture2D", "texture"),
    ("textureCube", "texture"),
    ("texture2DLod", "textureLod"),
    ("texture2DLodEXT", "textureLod"),
    ("textureCubeLod", "textureLod"),
    ("textureCubeLodEXT", "textureLod"),
    ("texture2DGradEXT", "textureGrad"),
    ("texture2DProj", "textureProj"),
];

const PRECISION_QUALIFIERS: [&str; 3] = ["lowp", "mediump", "highp"];

/// Produces a compilable GLSL fragment module from dialect source.
///
/// Steps performed:
///
/// 1. Recover the user code when `source` already is transpiler output, so
///    the transformation is idempotent.
/// 2. Strip `#version` directives, `precision` statements and loose
///    declarations of the standard uniforms.
/// 3. Rewrite legacy sampling calls (`texture2D(` becomes `texture(`, ...).
/// 4. Prepend [`PREAMBLE`] and append [`ENTRY_POINT`].
///
/// `fragCoord` is the backend's native fragment coordinate. Under wgpu that
/// is a top-left origin with y growing downward, so a program written for
/// a bottom-left origin renders vertically flipped. No flip is applied.
pub fn transpile(source: &str) -> String {
    let user_code = embedded_user_code(source).unwrap_or(source);
    let sanitized = strip_declarations(user_code);
    let rewritten = rewrite_legacy_sampling(&sanitized);
    format!("{PREAMBLE}{USER_CODE_BEGIN}\n{rewritten}{USER_CODE_END}\n{ENTRY_POINT}")
}

/// Joins the shared Common source ahead of a pass's source.
pub fn merge_common(common: &str, source: &str) -> String {
    if common.trim().is_empty() {
        source.to_string()
    } else {
        format!("{common}{COMMON_SEPARATOR}{source}")
    }
}

fn embedded_user_code(source: &str) -> Option<&str> {
    let begin = source.find(USER_CODE_BEGIN)? + USER_CODE_BEGIN.len();
    let rest = source[begin..].strip_prefix('\n')?;
    let end = rest.find(USER_CODE_END)?;
    Some(&rest[..end])
}

fn strip_declarations(source: &str) -> String {
    let mut sanitized = String::with_capacity(source.len());
    for line in source.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("#version") {
            continue;
        }
        let line = match standard_uniform_declaration(trimmed) {
            UniformDeclaration::Keep => strip_precision(line),
            UniformDeclaration::Drop => continue,
            UniformDeclaration::Rewrite(rewritten) => strip_precision(&rewritten),
        };
        if line.is_empty() && !trimmed.is_empty() {
            // The line held nothing but precision statements.
            continue;
        }
        sanitized.push_str(&line);
        sanitized.push('\n');
    }
    sanitized
}

enum UniformDeclaration {
    Keep,
    Drop,
    Rewrite(String),
}

/// Classifies a `uniform <type> <names>;` line. Standard names are removed
/// from multi-name declarations; the rest of the line survives.
fn standard_uniform_declaration(trimmed: &str) -> UniformDeclaration {
    let Some(rest) = trimmed.strip_prefix("uniform") else {
        return UniformDeclaration::Keep;
    };
    if !rest.starts_with(char::is_whitespace) {
        return UniformDeclaration::Keep;
    }
    let Some((declaration, trailing)) = rest.split_once(';') else {
        return UniformDeclaration::Keep;
    };
    let mut tokens = declaration
        .split_whitespace()
        .skip_while(|token| PRECISION_QUALIFIERS.contains(token));
    let Some(ty) = tokens.next() else {
        return UniformDeclaration::Keep;
    };
    let declarators = tokens.collect::<Vec<_>>().join(" ");
    let names: Vec<&str> = declarators
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .collect();
    let kept: Vec<&str> = names
        .iter()
        .copied()
        .filter(|name| {
            let base = name.split('[').next().unwrap_or_default().trim();
            !STANDARD_UNIFORMS.contains(&base)
        })
        .collect();

    if kept.len() == names.len() {
        UniformDeclaration::Keep
    } else if kept.is_empty() && trailing.trim().is_empty() {
        UniformDeclaration::Drop
    } else if kept.is_empty() {
        UniformDeclaration::Rewrite(trailing.trim_start().to_string())
    } else {
        UniformDeclaration::Rewrite(format!("uniform {ty} {};{trailing}", kept.join(", ")))
    }
}

/// Removes every `precision <qualifier> <type>;` statement from a line.
fn strip_precision(line: &str) -> String {
    let mut output = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(start) = find_identifier(rest, "precision") {
        let after = &rest[start + "precision".len()..];
        let mut tokens = after.split_whitespace();
        let qualifier = tokens.next().unwrap_or_default();
        let is_statement = PRECISION_QUALIFIERS.contains(&qualifier) && after.contains(';');
        if !is_statement {
            output.push_str(&rest[..start + "precision".len()]);
            rest = after;
            continue;
        }
        output.push_str(&rest[..start]);
        let end = after.find(';').map(|index| index + 1).unwrap_or(after.len());
        rest = &after[end..];
    }
    output.push_str(rest);
    if output.trim().is_empty() {
        String::new()
    } else {
        output
    }
}

/// Rewrites legacy call names, leaving argument lists untouched.
fn rewrite_legacy_sampling(source: &str) -> String {
    let mut output = String::with_capacity(source.len());
    let mut rest = source;
    while let Some((start, end)) = next_identifier(rest) {
        output.push_str(&rest[..start]);
        let identifier = &rest[start..end];
        let followed_by_call = rest[end..].trim_start().starts_with('(');
        let canonical = LEGACY_SAMPLING
            .iter()
            .find(|(legacy, _)| *legacy == identifier)
            .map(|(_, canonical)| *canonical);
        match canonical {
            Some(canonical) if followed_by_call => output.push_str(canonical),
            _ => output.push_str(identifier),
        }
        rest = &rest[end..];
    }
    output.push_str(rest);
    output
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Byte range of the next identifier-like token (identifiers and numbers).
fn next_identifier(text: &str) -> Option<(usize, usize)> {
    let start = text.find(is_identifier_char)?;
    let end = text[start..]
        .find(|c: char| !is_identifier_char(c))
        .map(|offset| start + offset)
        .unwrap_or(text.len());
    Some((start, end))
}

/// Finds `word` as a whole identifier inside `text`.
fn find_identifier(text: &str, word: &str) -> Option<usize> {
    let mut offset = 0;
    while let Some((start, end)) = next_identifier(&text[offset..]) {
        if &text[offset + start..offset + end] == word {
            return Some(offset + start);
        }
        offset += end;
    }
    None
}

/// GLSL prologue injected ahead of every pass.
///
/// The uniform block layout must match `PassParams` in `gpu/uniforms.rs`.
pub const PREAMBLE: &str = r"#version 450
layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 multipass_out_color;

layout(std140, set = 0, binding = 0) uniform PassParams {
    vec3 _iResolution;
    float _iTime;
    float _iTimeDelta;
    int _iFrame;
    float _iSampleRate;
    float _padding0;
    vec4 _iMouse;
    vec4 _iDate;
    float _iChannelTime[4];
    vec3 _iChannelResolution[4];
} params;

#define iResolution params._iResolution
#define iTime params._iTime
#define iTimeDelta params._iTimeDelta
#define iFrame params._iFrame
#define iSampleRate params._iSampleRate
#define iMouse params._iMouse
#define iDate params._iDate
#define iChannelTime params._iChannelTime
#define iChannelResolution params._iChannelResolution

layout(set = 1, binding = 0) uniform texture2D multipass_channel0_texture;
layout(set = 1, binding = 1) uniform sampler multipass_channel0_sampler;
layout(set = 1, binding = 2) uniform texture2D multipass_channel1_texture;
layout(set = 1, binding = 3) uniform sampler multipass_channel1_sampler;
layout(set = 1, binding = 4) uniform texture2D multipass_channel2_texture;
layout(set = 1, binding = 5) uniform sampler multipass_channel2_sampler;
layout(set = 1, binding = 6) uniform texture2D multipass_channel3_texture;
layout(set = 1, binding = 7) uniform sampler multipass_channel3_sampler;

#define iChannel0 sampler2D(multipass_channel0_texture, multipass_channel0_sampler)
#define iChannel1 sampler2D(multipass_channel1_texture, multipass_channel1_sampler)
#define iChannel2 sampler2D(multipass_channel2_texture, multipass_channel2_sampler)
#define iChannel3 sampler2D(multipass_channel3_texture, multipass_channel3_sampler)

";

/// GLSL epilogue that hands the native fragment coordinate to `mainImage`.
///
/// `gl_FragCoord.xy` is passed through unchanged: pixel centres at
/// (x + 0.5, y + 0.5) with (0.5, 0.5) at the top-left pixel under wgpu.
pub const ENTRY_POINT: &str = r"void main() {
    vec4 color = vec4(0.0);
    mainImage(color, gl_FragCoord.xy);
    multipass_out_color = color;
}
";

/// Full-screen triangle vertex shader shared by every pass.
pub const VERTEX_SHADER: &str = r"#version 450
layout(location = 0) out vec2 v_uv;

const vec2 positions[3] = vec2[3](
    vec2(-1.0, -3.0),
    vec2(3.0, 1.0),
    vec2(-1.0, 1.0)
);

void main() {
    uint vertex_index = uint(gl_VertexIndex);
    vec2 pos = positions[vertex_index];
    v_uv = pos * 0.5 + vec2(0.5, 0.5);
    gl_Position = vec4(pos, 0.0, 1.0);
}
";

/// Inspection pass: Reinhard tone-mapping plus gamma over `iChannel0`.
/// The `kernel` comment names the built-in [`crate::soft`] equivalent.
pub const DEBUG_TONEMAP_SOURCE: &str = r"// kernel: debug_tonemap
void mainImage(out vec4 fragColor, in vec2 fragCoord) {
    vec2 uv = fragCoord / iResolution.xy;
    vec4 hdr = texture(iChannel0, uv);
    vec3 mapped = hdr.rgb / (1.0 + hdr.rgb);
    mapped = pow(mapped, vec3(1.0 / 2.2));
    fragColor = vec4(mapped, hdr.a);
}
";
