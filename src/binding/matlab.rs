//! MATLAB source emitted into the namespace root.

use std::path::PathBuf;

const PACKAGE_TAG: &str = "% mip-package: ";
const DEPENDS_TAG: &str = "% mip-depends: ";
const PATH_TAG: &str = "% mip-path: ";

/// Host entry point that forwards `mip ...` typed at the MATLAB prompt to
/// the command-line tool.
pub const MIP_M: &str = r#"function mip(varargin)
%MIP Run the mip package manager from the MATLAB prompt.
%   mip install chebfun
%   mip uninstall chebfun
%   mip list
%
%   Packages are activated per session with mip.import('name').

if nargin == 0
    varargin = {'--help'};
end

args = cellfun(@(a) ['"' strrep(a, '"', '\"') '"'], varargin, 'UniformOutput', false);
status = system(['mip ' strjoin(args, ' ')]);
rehash;
if status ~= 0
    error('mip:commandFailed', 'mip exited with status %d', status);
end
end
"#;

/// Session-scoped import: runs a package's binding stub once per session.
pub const IMPORT_M: &str = r#"function import(packageName)
%IMPORT Activate an installed mip package for the current MATLAB session.
%   mip.import('surfacefun') adds the package and its dependencies to the
%   path. Nothing is saved; the next session starts clean.

persistent activated
if isempty(activated)
    activated = containers.Map('KeyType', 'char', 'ValueType', 'logical');
end

if isKey(activated, packageName)
    return;
end

ident = ['pkg_' regexprep(packageName, '[^A-Za-z0-9]', '_')];
binding = ['mip.bindings.' ident];
if isempty(which(binding))
    error('mip:notInstalled', ...
        'Package "%s" is not installed. Run "mip install %s" first.', ...
        packageName, packageName);
end

% Mark first so dependency cycles terminate
activated(packageName) = true;
try
    feval(binding);
catch err
    remove(activated, packageName);
    rethrow(err);
end
end
"#;

/// MATLAB identifier for a package binding.
pub fn binding_ident(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("pkg_{}", sanitized)
}

fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Binding stub for one package: imports its dependencies, then adds its
/// directories to the session path.
pub fn binding_stub(name: &str, depends_on: &[String], paths: &[PathBuf]) -> String {
    let ident = binding_ident(name);
    let mut out = String::new();
    out.push_str(&format!("function {}()\n", ident));
    out.push_str(&format!(
        "%{} Session binding for mip package '{}'. Generated by mip.\n",
        ident.to_uppercase(),
        name
    ));
    out.push_str(&format!("{}{}\n", PACKAGE_TAG, name));
    for dep in depends_on {
        out.push_str(&format!("{}{}\n", DEPENDS_TAG, dep));
    }
    for path in paths {
        out.push_str(&format!("{}{}\n", PATH_TAG, path.display()));
    }
    out.push('\n');
    for dep in depends_on {
        out.push_str(&format!("mip.import({});\n", quote(dep)));
    }
    let quoted: Vec<String> = paths
        .iter()
        .map(|p| quote(&p.display().to_string()))
        .collect();
    if !quoted.is_empty() {
        out.push_str(&format!("addpath({});\n", quoted.join(", ")));
    }
    out.push_str("end\n");
    out
}

/// What a binding stub records about its package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingRecord {
    pub name: String,
    pub depends_on: Vec<String>,
    pub paths: Vec<PathBuf>,
}

impl BindingRecord {
    /// Read the header written by [`binding_stub`]. `None` for files that
    /// were not generated by mip.
    pub fn parse(content: &str) -> Option<Self> {
        let mut name = None;
        let mut depends_on = Vec::new();
        let mut paths = Vec::new();
        for line in content.lines() {
            if let Some(value) = line.strip_prefix(PACKAGE_TAG) {
                name = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix(DEPENDS_TAG) {
                depends_on.push(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix(PATH_TAG) {
                paths.push(PathBuf::from(value.trim_end()));
            } else if !line.starts_with('%') && !line.starts_with("function") {
                break;
            }
        }
        Some(Self {
            name: name.filter(|n| !n.is_empty())?,
            depends_on,
            paths,
        })
    }
}
