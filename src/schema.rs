use crate::error::{Error, Result};
use log::{debug, warn};
use prost_reflect::{DescriptorPool, MethodDescriptor, ServiceDescriptor};
use protox::file::{
    ChainFileResolver, File, FileResolver, GoogleFileResolver, IncludeFileResolver,
};
use serde::Serialize;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};
use tokio::fs;

/// Services and methods of one schema file, flattened for display.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SchemaCatalog {
    services: Vec<String>,
    methods: HashMap<String, Vec<String>>,
    source_path: String,
}

impl SchemaCatalog {
    /// Loads `path` and lists every service it declares.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Schema::load(path).await?.catalog())
    }

    /// Qualified service names in declaration order.
    pub fn services(&self) -> &[String] {
        &self.services
    }

    pub fn methods(&self, service: &str) -> Option<&[String]> {
        self.methods.get(service).map(Vec::as_slice)
    }

    pub fn source_path(&self) -> &str {
        &self.source_path
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// A node of the package tree. Packages only hold children; services are
/// leaves and are never descended into.
#[derive(Debug, Clone)]
pub enum SchemaNode {
    Namespace(Vec<(String, SchemaNode)>),
    Service(ServiceDescriptor),
}

impl SchemaNode {
    fn insert(&mut self, segments: &[&str], service: ServiceDescriptor) {
        let SchemaNode::Namespace(children) = self else {
            return;
        };
        let Some((head, rest)) = segments.split_first() else {
            return;
        };
        if rest.is_empty() {
            children.push((head.to_string(), SchemaNode::Service(service)));
            return;
        }
        let idx = match children
            .iter()
            .position(|(name, node)| name == head && matches!(node, SchemaNode::Namespace(_)))
        {
            Some(idx) => idx,
            None => {
                children.push((head.to_string(), SchemaNode::Namespace(vec![])));
                children.len() - 1
            }
        };
        children[idx].1.insert(rest, service);
    }

    /// Follows a dot separated path from this node.
    pub fn descend(&self, qualified: &str) -> Option<&SchemaNode> {
        qualified.split('.').try_fold(self, |node, segment| match node {
            SchemaNode::Namespace(children) => children
                .iter()
                .find(|(name, _)| name == segment)
                .map(|(_, child)| child),
            SchemaNode::Service(_) => None,
        })
    }

    fn collect(&self, prefix: &str, services: &mut Vec<String>, methods: &mut HashMap<String, Vec<String>>) {
        match self {
            SchemaNode::Service(service) => {
                services.push(prefix.to_owned());
                methods.insert(
                    prefix.to_owned(),
                    service.methods().map(|m| m.name().to_owned()).collect(),
                );
            }
            SchemaNode::Namespace(children) => {
                for (name, child) in children {
                    let path = if prefix.is_empty() {
                        name.clone()
                    } else {
                        format!("{}.{}", prefix, name)
                    };
                    child.collect(&path, services, methods);
                }
            }
        }
    }
}

/// A compiled schema file together with its package tree.
#[derive(Debug, Clone)]
pub struct Schema {
    path: PathBuf,
    pool: DescriptorPool,
    root: SchemaNode,
}

impl Schema {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let pool = load_pool(path).await?;
        let mut root = SchemaNode::Namespace(vec![]);
        for service in pool.services() {
            let name = service.full_name().to_owned();
            debug!("Found service {} in {:?}", name, path);
            let segments: Vec<&str> = name.split('.').collect();
            root.insert(&segments, service);
        }
        Ok(Self {
            path: path.to_owned(),
            pool,
            root,
        })
    }

    pub fn catalog(&self) -> SchemaCatalog {
        let mut services = vec![];
        let mut methods = HashMap::new();
        self.root.collect("", &mut services, &mut methods);
        if services.is_empty() {
            warn!("No services found in {:?}.", self.path);
        }
        SchemaCatalog {
            services,
            methods,
            source_path: self.path.to_string_lossy().into_owned(),
        }
    }

    /// The service at a qualified name, walking the package tree one segment
    /// at a time.
    pub fn service(&self, qualified: &str) -> Option<&ServiceDescriptor> {
        match self.root.descend(qualified)? {
            SchemaNode::Service(service) => Some(service),
            SchemaNode::Namespace(_) => None,
        }
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    pub fn root(&self) -> &SchemaNode {
        &self.root
    }
}

pub fn method(service: &ServiceDescriptor, name: &str) -> Option<MethodDescriptor> {
    service.methods().find(|m| m.name() == name)
}

/// Compiles a schema file, resolving imports next to it. The file itself is
/// read through `tokio::fs`; compiling reads imports, so it runs on the
/// blocking pool.
pub(crate) async fn load_pool(path: &Path) -> Result<DescriptorPool> {
    let fail = |cause: String| Error::SchemaLoad {
        path: path.to_owned(),
        cause,
    };
    let file = fs::canonicalize(path)
        .await
        .map_err(|e| fail(e.to_string()))?;
    let include = file
        .parent()
        .ok_or_else(|| fail("schema file has no parent directory".into()))?
        .to_owned();
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| fail("schema file name is not valid UTF-8".into()))?
        .to_owned();
    let source = fs::read_to_string(&file)
        .await
        .map_err(|e| fail(e.to_string()))?;
    debug!("Compiling {:?} with include path {:?}", file, include);
    let compiled = tokio::task::spawn_blocking(move || {
        let mut imports = ChainFileResolver::new();
        imports.add(IncludeFileResolver::new(include));
        imports.add(GoogleFileResolver::new());
        let mut compiler = protox::Compiler::with_file_resolver(SourceResolver {
            name: name.clone(),
            source,
            imports,
        });
        compiler.include_imports(true);
        compiler.open_file(&name).map_err(|e| e.to_string())?;
        Ok::<_, String>(compiler.descriptor_pool())
    })
    .await
    .map_err(|e| fail(e.to_string()))?;
    compiled.map_err(fail)
}

/// Serves an already read schema by name and everything else from the
/// include path.
struct SourceResolver {
    name: String,
    source: String,
    imports: ChainFileResolver,
}

impl FileResolver for SourceResolver {
    fn resolve_path(&self, path: &Path) -> Option<String> {
        if path == Path::new(&self.name) {
            return Some(self.name.clone());
        }
        self.imports.resolve_path(path)
    }

    fn open_file(&self, name: &str) -> std::result::Result<File, protox::Error> {
        if name == self.name {
            return File::from_source(name, &self.source);
        }
        self.imports.open_file(name)
    }
}

/// A schema file found in the workspace.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SchemaFile {
    pub name: String,
    pub path: PathBuf,
}

/// Every `.proto` file under `root`, skipping `node_modules` and hidden
/// directories.
pub async fn find_schemas<P: AsRef<Path>>(root: P) -> std::io::Result<Vec<SchemaFile>> {
    let mut found = vec![];
    let mut pending = vec![root.as_ref().to_owned()];
    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await?.is_dir() {
                if name != "node_modules" && !name.starts_with('.') {
                    pending.push(path);
                }
            } else if path.extension().map_or(false, |ext| ext == "proto") {
                found.push(SchemaFile { name, path });
            }
        }
    }
    found.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(found)
}
