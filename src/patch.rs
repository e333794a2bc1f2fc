//! Build-time configuration of the index projects.
//!
//! The projects are configured by rewriting constants in `include/Common.h` with `sed` before
//! building, so every parameter change means a rebuild on all nodes.

use crate::config::ConfigError;
use crate::method::Method;

/// Relative to the project directory.
pub const COMMON_HEADER: &str = "./include/Common.h";
/// Relative to the project directory.
pub const WORKLOADS_CONF: &str = "./workloads.conf";

/// Sherman's cache eviction is off by default and needs to be on when the cache is this small (MB).
const SHERMAN_EVICTION_THRESHOLD_MB: u64 = 80;

/// The compile-time parameters of one build.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BuildParams {
    pub key_size: u64,
    pub value_size: u64,
    pub cache_size: u64,
    pub mn_num: u64,
    pub span_size: Option<u64>,
    pub epsilon: Option<u64>,
    pub neighbor_size: Option<u64>,
    pub hotspot_buffer_size: Option<u64>,
    pub greedy_io_size: Option<u64>,
}

/// `sed -i` replacing the whole line that starts with `pattern`.
fn sed_line(path: &str, pattern: &str, replacement: &str) -> String {
    format!("sed -i 's/^{} .*/{}/g' {}", pattern, replacement, path)
}

fn sed_constexpr(path: &str, ty: &str, name: &str, value: u64) -> String {
    let decl = format!("constexpr {} {}", ty, name);
    sed_line(path, &decl, &format!("{} = {};", decl, value))
}

fn required(method: &Method, parameter: &'static str, value: Option<u64>) -> Result<u64, ConfigError> {
    value.ok_or_else(|| ConfigError::MissingParameter {
        method: method.to_string(),
        parameter,
    })
}

/// The `sed` commands that patch `params` into the header at `path`, joined with `&&`.
pub fn header_patch(path: &str, method: &Method, params: &BuildParams) -> Result<String, ConfigError> {
    let base = method.base;

    let mut cmds = vec![
        sed_constexpr(path, "uint32_t", "keyLen", params.key_size),
        sed_constexpr(path, "uint32_t", "simulatedValLen", params.value_size),
        sed_constexpr(path, "int", "kIndexCacheSize", params.cache_size),
        sed_line(
            path,
            "#define MEMORY_NODE_NUM",
            &format!("#define MEMORY_NODE_NUM {}", params.mn_num),
        ),
    ];

    if base.needs_span_size() {
        let span = required(method, "span_size", params.span_size)?;
        cmds.push(sed_constexpr(path, "uint32_t", "leafSpanSize", span));
    }

    if base.needs_epsilon() {
        let epsilon = required(method, "epsilon", params.epsilon)?;
        cmds.push(sed_constexpr(path, "uint64_t", "epsilon", epsilon));
    }

    if base.needs_hotspot_params() {
        let neighbor = required(method, "neighbor_size", params.neighbor_size)?;
        cmds.push(sed_constexpr(path, "uint32_t", "neighborSize", neighbor));

        let buffer = required(method, "hotspot_buffer_size", params.hotspot_buffer_size)?;
        cmds.push(sed_constexpr(path, "int", "kHotspotBufSize", buffer));

        if let Some(io) = params.greedy_io_size {
            cmds.push(sed_constexpr(path, "uint64_t", "greedySizePerIO", io));
        }
    }

    Ok(cmds.join(" && "))
}

/// Point the workload config file at the workload directory.
pub fn workloads_dir_patch(path: &str, workloads_dir: &str) -> String {
    format!("sed -i 's#.*#{}#g' {}", workloads_dir, path)
}

/// Adjust the cmake options for parameters that need a different build configuration.
pub fn cmake_options(method: &Method, params: &BuildParams, options: &str) -> String {
    if method.base == crate::method::BaseMethod::Sherman
        && params.cache_size < SHERMAN_EVICTION_THRESHOLD_MB
    {
        options.replace("-DENABLE_CACHE_EVICTION=off", "-DENABLE_CACHE_EVICTION=on")
    } else {
        options.to_owned()
    }
}

/// The full command to reconfigure and rebuild the project in `project_dir`.
pub fn build_command(
    project_dir: &str,
    method: &Method,
    params: &BuildParams,
    workloads_dir: &str,
    cmake_options: &str,
) -> Result<String, ConfigError> {
    let patch = header_patch(COMMON_HEADER, method, params)?;
    Ok(format!(
        "cd {} && {} && {} && mkdir -p build && cd build && cmake {} .. && make clean && make -j",
        project_dir,
        workloads_dir_patch(WORKLOADS_CONF, workloads_dir),
        patch,
        self::cmake_options(method, params, cmake_options),
    ))
}
