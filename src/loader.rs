//! Runtime class/resource loader backed by the deserialized index.
//!
//! Lookups resolve straight against the archives that the index says may
//! hold a name, in classpath order. Names under a fully indexed directory are
//! answered from the directly indexed table, so misses there never touch an
//! archive.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::buffer::BufferPool;
use crate::classfile::{self, OBJECT_CLASS};
use crate::config::LoaderConfig;
use crate::error::{IndexError, Result};
use crate::format::{self, SerializedApplication};
use crate::handle::OpenStats;
use crate::index::is_fully_indexed;
use crate::manifest::ManifestInfo;
use crate::resource::{ArchiveResource, ProtectionDomain, ResourceUrl};
use crate::visitor::parent_dir;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassOrigin {
    /// Supplied by the parent/platform loader.
    Parent,
    Archive {
        index: usize,
        path: PathBuf,
        protection_domain: ProtectionDomain,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DefinedClass {
    pub name: String,
    pub super_name: Option<String>,
    pub origin: ClassOrigin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageInfo {
    pub name: String,
    pub manifest: Option<ManifestInfo>,
    pub code_source: String,
}

/// The loader consulted for platform names, parent-first packages and as
/// the last resort.
pub trait ParentLoader: Send + Sync {
    fn load_class(&self, name: &str) -> Option<Arc<DefinedClass>>;

    fn resource(&self, _name: &str) -> Option<ResourceUrl> {
        None
    }

    fn resources(&self, name: &str) -> Vec<ResourceUrl> {
        self.resource(name).into_iter().collect()
    }
}

/// Stands in for the platform class loader: it knows every class under the
/// configured platform prefixes and nothing else.
#[derive(Debug, Clone)]
pub struct PlatformParent {
    prefixes: Vec<String>,
}

impl PlatformParent {
    pub fn new(prefixes: Vec<String>) -> Self {
        Self { prefixes }
    }
}

impl ParentLoader for PlatformParent {
    fn load_class(&self, name: &str) -> Option<Arc<DefinedClass>> {
        if !self.prefixes.iter().any(|p| name.starts_with(p.as_str())) {
            return None;
        }
        let super_name = (name != OBJECT_CLASS).then(|| OBJECT_CLASS.to_string());
        Some(Arc::new(DefinedClass {
            name: name.to_string(),
            super_name,
            origin: ClassOrigin::Parent,
        }))
    }
}

/// Turns class bytes into a class. The host runtime provides the real one.
pub trait ClassDefiner: Send + Sync {
    fn define_class(&self, name: &str, bytes: &[u8], source: &ArchiveResource) -> Result<DefinedClass>;
}

/// Validates the class-file header and records where the class came from.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderDefiner;

impl ClassDefiner for HeaderDefiner {
    fn define_class(&self, name: &str, bytes: &[u8], source: &ArchiveResource) -> Result<DefinedClass> {
        let header = classfile::read_header(name, bytes)?;
        if header.name != name {
            return Err(IndexError::class_format(
                name,
                format!("wrong name: file declares {}", header.name),
            ));
        }
        Ok(DefinedClass {
            name: header.name,
            super_name: header.super_name,
            origin: ClassOrigin::Archive {
                index: source.index(),
                path: source.path().to_path_buf(),
                protection_domain: source.init().clone(),
            },
        })
    }
}

/// Everything a loader shares with its archives, passed in explicitly.
#[derive(Debug, Clone)]
pub struct LoaderContext {
    pub pool: Arc<BufferPool>,
    pub stats: Arc<OpenStats>,
    pub config: LoaderConfig,
}

impl LoaderContext {
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            pool: Arc::new(BufferPool::new(config.max_pooled_buffer)),
            stats: Arc::new(OpenStats::default()),
            config,
        }
    }
}

impl Default for LoaderContext {
    fn default() -> Self {
        Self::new(LoaderConfig::default())
    }
}

/// Most-recently-used archive indices. Slot 0 is the newest.
#[derive(Debug)]
struct HotWindow {
    slots: Vec<Option<usize>>,
}

impl HotWindow {
    fn new(size: usize) -> Self {
        Self {
            slots: vec![None; size],
        }
    }

    /// Moves `idx` to the front and returns the index pushed out, if any.
    fn touch(&mut self, idx: usize) -> Option<usize> {
        if self.slots.is_empty() || self.slots[0] == Some(idx) {
            return None;
        }
        if let Some(pos) = self.slots.iter().position(|s| *s == Some(idx)) {
            self.slots[..=pos].rotate_right(1);
            return None;
        }
        self.slots.rotate_right(1);
        self.slots[0].replace(idx)
    }
}

pub struct RunnerClassLoader {
    main_class: String,
    resources: Vec<ArchiveResource>,
    directory_index: HashMap<String, Vec<usize>>,
    directly_indexed: HashMap<String, Vec<usize>>,
    parent_first: HashSet<String>,
    negative: HashSet<String>,
    platform_prefixes: Vec<String>,
    defined: RwLock<HashMap<String, Arc<DefinedClass>>>,
    packages: RwLock<HashMap<String, Arc<PackageInfo>>>,
    window: Mutex<HotWindow>,
    post_bootstrap: AtomicBool,
    ctx: LoaderContext,
    parent: Arc<dyn ParentLoader>,
    definer: Arc<dyn ClassDefiner>,
}

impl std::fmt::Debug for RunnerClassLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerClassLoader")
            .field("main_class", &self.main_class)
            .field("archives", &self.resources.len())
            .field("post_bootstrap", &self.post_bootstrap.load(Ordering::Relaxed))
            .finish()
    }
}

fn sanitize(name: &str) -> &str {
    name.strip_prefix('/').unwrap_or(name)
}

/// `org.acme.Foo` -> `org/acme`.
fn package_dir(class: &str) -> String {
    match class.rfind('.') {
        Some(idx) => class[..idx].replace('.', "/"),
        None => String::new(),
    }
}

impl RunnerClassLoader {
    pub fn new(
        app: SerializedApplication,
        ctx: LoaderContext,
        parent: Arc<dyn ParentLoader>,
        definer: Arc<dyn ClassDefiner>,
    ) -> Self {
        let mut directory_index: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, archive) in app.archives.iter().enumerate() {
            for dir in archive.directories.iter() {
                directory_index.entry(dir.clone()).or_default().push(idx);
            }
        }

        let directly_indexed = app
            .directly_indexed
            .into_iter()
            .map(|(name, idx)| (name, idx.into_iter().map(usize::from).collect()))
            .collect();

        let resources: Vec<ArchiveResource> = app
            .archives
            .into_iter()
            .enumerate()
            .map(|(idx, meta)| {
                ArchiveResource::new(idx, meta, Arc::clone(&ctx.pool), Arc::clone(&ctx.stats))
            })
            .collect();
        for res in resources.iter() {
            res.init();
        }

        let mut loader = Self {
            main_class: app.main_class,
            resources,
            directory_index,
            directly_indexed,
            parent_first: app.parent_first_packages.into_iter().collect(),
            negative: HashSet::new(),
            platform_prefixes: ctx.config.platform_prefixes.clone(),
            defined: RwLock::new(HashMap::new()),
            packages: RwLock::new(HashMap::new()),
            window: Mutex::new(HotWindow::new(ctx.config.hot_window_size)),
            post_bootstrap: AtomicBool::new(false),
            ctx,
            parent,
            definer,
        };
        let negative: HashSet<String> = loader
            .ctx
            .config
            .negative_probes
            .iter()
            .map(|p| sanitize(p))
            .filter(|p| loader.provably_absent(p))
            .map(str::to_string)
            .collect();
        loader.negative = negative;

        tracing::debug!(
            archives = loader.resources.len(),
            negative = loader.negative.len(),
            "runner class loader ready"
        );
        loader
    }

    /// Reads an index file and builds a loader from it.
    pub fn from_index_file(
        index: &Path,
        app_root: &Path,
        ctx: LoaderContext,
        parent: Arc<dyn ParentLoader>,
        definer: Arc<dyn ClassDefiner>,
    ) -> Result<Self> {
        let file = std::fs::File::open(index).map_err(|e| IndexError::io(index, e))?;
        let app = format::read(&mut BufReader::new(file), app_root)?;
        Ok(Self::new(app, ctx, parent, definer))
    }

    pub fn main_class(&self) -> &str {
        &self.main_class
    }

    pub fn archives(&self) -> &[ArchiveResource] {
        &self.resources
    }

    pub fn stats(&self) -> &OpenStats {
        &self.ctx.stats
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.ctx.pool
    }

    pub fn is_post_bootstrap(&self) -> bool {
        self.post_bootstrap.load(Ordering::Acquire)
    }

    /// Archive indices that may hold `name`, in classpath order.
    fn candidates(&self, name: &str) -> &[usize] {
        let dir = parent_dir(name);
        let hits = if is_fully_indexed(dir) {
            self.directly_indexed.get(name)
        } else {
            self.directory_index.get(dir)
        };
        hits.map(Vec::as_slice).unwrap_or(&[])
    }

    fn provably_absent(&self, name: &str) -> bool {
        self.candidates(name)
            .iter()
            .all(|idx| !self.resources[*idx].may_contain(name))
    }

    fn is_platform_class(&self, name: &str) -> bool {
        self.platform_prefixes
            .iter()
            .any(|p| name.starts_with(p.as_str()))
    }

    fn touch(&self, idx: usize) {
        if !self.is_post_bootstrap() {
            return;
        }
        let evicted = self.window.lock().touch(idx);
        if let Some(evicted) = evicted {
            tracing::trace!(
                archive = %self.resources[evicted].path().display(),
                "evicted from hot window"
            );
            self.resources[evicted].reset_internal_caches();
        }
    }

    pub fn find_loaded_class(&self, name: &str) -> Option<Arc<DefinedClass>> {
        self.defined.read().get(name).cloned()
    }

    pub fn load_class(&self, name: &str) -> Result<Arc<DefinedClass>> {
        self.load_class_chain(name, &mut Vec::new())
    }

    pub fn load_main_class(&self) -> Result<Arc<DefinedClass>> {
        self.load_class(&self.main_class)
    }

    fn load_class_chain(&self, name: &str, chain: &mut Vec<String>) -> Result<Arc<DefinedClass>> {
        if let Some(class) = self.find_loaded_class(name) {
            return Ok(class);
        }
        if self.is_platform_class(name) {
            return self
                .parent
                .load_class(name)
                .ok_or_else(|| IndexError::ClassNotFound(name.to_string()));
        }

        let pkg = package_dir(name);
        if self.parent_first.contains(&pkg)
            && let Some(class) = self.parent.load_class(name)
        {
            return Ok(class);
        }

        let resource_name = format!("{}.class", name.replace('.', "/"));
        for idx in self.candidates(&resource_name) {
            let res = &self.resources[*idx];
            self.touch(*idx);
            let defined = res.with_entry(&resource_name, |bytes| {
                self.define_from_archive(name, &pkg, bytes, res, chain)
            })?;
            if let Some(class) = defined {
                return Ok(class);
            }
        }

        self.parent
            .load_class(name)
            .ok_or_else(|| IndexError::ClassNotFound(name.to_string()))
    }

    fn define_from_archive(
        &self,
        name: &str,
        pkg: &str,
        bytes: &[u8],
        res: &ArchiveResource,
        chain: &mut Vec<String>,
    ) -> Result<Arc<DefinedClass>> {
        if chain.iter().any(|c| c == name) {
            return Err(IndexError::class_format(name, "class circularity"));
        }
        if let Some(super_name) = classfile::super_class_name(name, bytes)?
            && super_name != OBJECT_CLASS
        {
            chain.push(name.to_string());
            let loaded = self.load_class_chain(&super_name, chain);
            chain.pop();
            loaded?;
        }

        self.define_package(pkg, res);
        let class = self.definer.define_class(name, bytes, res)?;
        tracing::trace!(class = name, archive = %res.path().display(), "class defined");
        let mut defined = self.defined.write();
        Ok(Arc::clone(
            defined
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(class)),
        ))
    }

    fn define_package(&self, pkg: &str, res: &ArchiveResource) {
        let name = pkg.replace('/', ".");
        if self.packages.read().contains_key(&name) {
            return;
        }
        let info = PackageInfo {
            name: name.clone(),
            manifest: res.manifest().cloned(),
            code_source: res.init().code_source.clone(),
        };
        self.packages
            .write()
            .entry(name)
            .or_insert_with(|| Arc::new(info));
    }

    pub fn package(&self, name: &str) -> Option<Arc<PackageInfo>> {
        self.packages.read().get(name).cloned()
    }

    /// First archive in classpath order that holds `name`.
    pub fn find_resource(&self, name: &str) -> Result<Option<ResourceUrl>> {
        let name = sanitize(name);
        if self.negative.contains(name) {
            return Ok(None);
        }
        for idx in self.candidates(name) {
            self.touch(*idx);
            if let Some(url) = self.resources[*idx].resource_url(name)? {
                return Ok(Some(url));
            }
        }
        Ok(None)
    }

    /// One URL per archive that holds `name`, in classpath order.
    pub fn find_resources(&self, name: &str) -> Result<Vec<ResourceUrl>> {
        let name = sanitize(name);
        if self.negative.contains(name) {
            return Ok(Vec::new());
        }
        let mut urls = Vec::new();
        for idx in self.candidates(name) {
            self.touch(*idx);
            if let Some(url) = self.resources[*idx].resource_url(name)? {
                urls.push(url);
            }
        }
        Ok(urls)
    }

    /// Index first, parent as fallback.
    pub fn get_resource(&self, name: &str) -> Result<Option<ResourceUrl>> {
        match self.find_resource(name)? {
            Some(url) => Ok(Some(url)),
            None => Ok(self.parent.resource(sanitize(name))),
        }
    }

    pub fn get_resources(&self, name: &str) -> Result<Vec<ResourceUrl>> {
        let mut urls = self.find_resources(name)?;
        urls.extend(self.parent.resources(sanitize(name)));
        Ok(urls)
    }

    /// Bytes of the first matching resource on the classpath.
    pub fn resource_bytes(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let name = sanitize(name);
        if self.negative.contains(name) {
            return Ok(None);
        }
        for idx in self.candidates(name) {
            self.touch(*idx);
            if let Some(bytes) = self.resources[*idx].resource_bytes(name)? {
                return Ok(Some(bytes));
            }
        }
        match self.parent.resource(name) {
            Some(url) => url.read_bytes().map(Some),
            None => Ok(None),
        }
    }

    /// Ends bootstrap: drops every idle handle, turns on the hot window and
    /// stops pooling buffers. Only the first call has any effect.
    pub fn reset_internal_caches(&self) {
        if self.post_bootstrap.swap(true, Ordering::AcqRel) {
            tracing::warn!("reset_internal_caches called more than once; ignoring");
            return;
        }
        for res in self.resources.iter() {
            res.reset_internal_caches();
        }
        self.ctx.pool.disable_pooling();
        tracing::debug!(
            open_handles = self.ctx.stats.open_handles(),
            "bootstrap complete, hot window active"
        );
    }

    /// Releases every archive handle this loader holds.
    pub fn close(&self) {
        for res in self.resources.iter() {
            res.close();
        }
        tracing::debug!(open_handles = self.ctx.stats.open_handles(), "runner class loader closed");
    }
}

impl Drop for RunnerClassLoader {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ArchiveMetadata;
    use crate::testutil::{class_bytes, temp_path, write_jar};

    #[derive(Default)]
    struct RecordingDefiner {
        order: Mutex<Vec<String>>,
    }

    impl ClassDefiner for RecordingDefiner {
        fn define_class(&self, name: &str, bytes: &[u8], source: &ArchiveResource) -> Result<DefinedClass> {
            self.order.lock().push(name.to_string());
            HeaderDefiner.define_class(name, bytes, source)
        }
    }

    #[derive(Default)]
    struct FixedParent {
        classes: HashSet<String>,
        resources: HashSet<String>,
    }

    impl ParentLoader for FixedParent {
        fn load_class(&self, name: &str) -> Option<Arc<DefinedClass>> {
            self.classes.contains(name).then(|| {
                Arc::new(DefinedClass {
                    name: name.to_string(),
                    super_name: None,
                    origin: ClassOrigin::Parent,
                })
            })
        }

        fn resource(&self, name: &str) -> Option<ResourceUrl> {
            self.resources.contains(name).then(|| ResourceUrl::Memory {
                name: name.to_string(),
                bytes: Arc::from(&b"parent"[..]),
            })
        }
    }

    fn loader_for(
        archives: &[PathBuf],
        parent_first: &[PathBuf],
        parent: Arc<dyn ParentLoader>,
        definer: Arc<dyn ClassDefiner>,
    ) -> anyhow::Result<RunnerClassLoader> {
        let mut bytes = Vec::new();
        format::write(&mut bytes, Path::new("/"), archives, "app.Main", parent_first)?;
        let app = format::read(&mut std::io::Cursor::new(bytes), Path::new("/"))?;
        Ok(RunnerClassLoader::new(app, LoaderContext::default(), parent, definer))
    }

    #[test]
    fn hot_window_keeps_most_recent_entries() {
        let mut window = HotWindow::new(4);
        for i in 0..4 {
            assert_eq!(window.touch(i), None);
        }
        assert_eq!(window.touch(1), None);
        assert_eq!(window.slots, vec![Some(1), Some(3), Some(2), Some(0)]);
        assert_eq!(window.touch(7), Some(0));
        assert_eq!(window.touch(7), None);
        assert_eq!(HotWindow::new(0).touch(3), None);
    }

    #[test]
    fn super_class_is_defined_before_subclass() -> anyhow::Result<()> {
        let base = temp_path("loader_super_base.jar");
        let app = temp_path("loader_super_app.jar");
        write_jar(&base, &[("lib/Base.class", &class_bytes("lib/Base", Some("java/lang/Object")))])?;
        write_jar(&app, &[("app/Child.class", &class_bytes("app/Child", Some("lib/Base")))])?;

        let definer = Arc::new(RecordingDefiner::default());
        let loader = loader_for(
            &[app.clone(), base.clone()],
            &[],
            Arc::new(PlatformParent::new(vec!["java.".into()])),
            Arc::clone(&definer) as Arc<dyn ClassDefiner>,
        )?;

        let child = loader.load_class("app.Child")?;
        assert_eq!(child.super_name.as_deref(), Some("lib.Base"));
        assert!(matches!(child.origin, ClassOrigin::Archive { index: 0, .. }));
        assert_eq!(*definer.order.lock(), vec!["lib.Base", "app.Child"]);
        assert!(loader.find_loaded_class("lib.Base").is_some());

        let again = loader.load_class("app.Child")?;
        assert!(Arc::ptr_eq(&child, &again));
        assert_eq!(definer.order.lock().len(), 2);
        assert!(loader.package("app").is_some());

        std::fs::remove_file(base)?;
        std::fs::remove_file(app)?;
        Ok(())
    }

    #[test]
    fn platform_and_parent_first_names_go_to_parent() -> anyhow::Result<()> {
        let jar = temp_path("loader_parent_first.jar");
        write_jar(
            &jar,
            &[
                ("java/util/Evil.class", &class_bytes("java/util/Evil", Some("java/lang/Object"))),
                ("shared/Api.class", &class_bytes("shared/Api", Some("java/lang/Object"))),
                ("shared/Local.class", &class_bytes("shared/Local", Some("java/lang/Object"))),
            ],
        )?;
        let parent = Arc::new(FixedParent {
            classes: ["shared.Api".to_string()].into_iter().collect(),
            ..Default::default()
        });
        let loader = loader_for(&[jar.clone()], &[jar.clone()], parent, Arc::new(HeaderDefiner))?;

        assert!(matches!(
            loader.load_class("java.util.Evil"),
            Err(IndexError::ClassNotFound(_))
        ));
        assert_eq!(loader.stats().opens(), 0);

        assert_eq!(loader.load_class("shared.Api")?.origin, ClassOrigin::Parent);
        assert!(matches!(
            loader.load_class("shared.Local")?.origin,
            ClassOrigin::Archive { .. }
        ));
        std::fs::remove_file(jar)?;
        Ok(())
    }

    #[test]
    fn missing_classes_fall_back_to_parent_last() -> anyhow::Result<()> {
        let jar = temp_path("loader_parent_last.jar");
        write_jar(
            &jar,
            &[
                ("app/Main.class", &class_bytes("app/Main", Some("java/lang/Object"))),
                ("app/local.txt", b"local"),
            ],
        )?;
        let parent = Arc::new(FixedParent {
            classes: ["ext.Provided".to_string()].into_iter().collect(),
            resources: ["ext/provided.txt".to_string()].into_iter().collect(),
        });
        let loader = loader_for(&[jar.clone()], &[], parent, Arc::new(HeaderDefiner))?;

        assert_eq!(loader.load_class("ext.Provided")?.origin, ClassOrigin::Parent);
        assert!(matches!(
            loader.load_class("ext.Missing"),
            Err(IndexError::ClassNotFound(name)) if name == "ext.Missing"
        ));
        assert!(matches!(
            loader.load_class("Nope"),
            Err(IndexError::ClassNotFound(_))
        ));

        let main = loader.load_main_class()?;
        assert_eq!(main.name, "app.Main");
        assert!(matches!(main.origin, ClassOrigin::Archive { index: 0, .. }));

        let local = loader.get_resource("app/local.txt")?;
        assert!(matches!(local, Some(ResourceUrl::Jar { .. })));
        let provided = loader.get_resource("/ext/provided.txt")?;
        assert!(matches!(provided, Some(ResourceUrl::Memory { .. })));
        assert_eq!(loader.find_resource("ext/provided.txt")?, None);
        assert_eq!(loader.get_resource("ext/absent.txt")?, None);

        std::fs::remove_file(jar)?;
        Ok(())
    }

    #[test]
    fn circular_hierarchy_is_a_class_format_error() -> anyhow::Result<()> {
        let jar = temp_path("loader_cycle.jar");
        write_jar(
            &jar,
            &[
                ("c/A.class", &class_bytes("c/A", Some("c/B"))),
                ("c/B.class", &class_bytes("c/B", Some("c/A"))),
            ],
        )?;
        let loader = loader_for(&[jar.clone()], &[], Arc::new(PlatformParent::new(vec![])), Arc::new(HeaderDefiner))?;
        assert!(matches!(
            loader.load_class("c.A"),
            Err(IndexError::ClassFormat { .. })
        ));
        std::fs::remove_file(jar)?;
        Ok(())
    }

    #[test]
    fn malformed_class_bytes_surface_as_class_format() -> anyhow::Result<()> {
        let jar = temp_path("loader_malformed.jar");
        write_jar(&jar, &[("m/Bad.class", b"\xCA\xFE\xBA\xBE\x00")])?;
        let loader = loader_for(&[jar.clone()], &[], Arc::new(PlatformParent::new(vec![])), Arc::new(HeaderDefiner))?;
        assert!(matches!(
            loader.load_class("m.Bad"),
            Err(IndexError::ClassFormat { .. })
        ));
        std::fs::remove_file(jar)?;
        Ok(())
    }

    #[test]
    fn negative_probes_are_answered_without_lookup() {
        let meta = ArchiveMetadata {
            path: temp_path("never_opened.jar"),
            manifest: None,
            generated_bytecode: false,
            transformed_bytecode: false,
            directories: vec!["org/slf4j/impl".to_string()],
            entries: None,
        };
        let app = SerializedApplication {
            main_class: "app.Main".to_string(),
            archives: vec![meta],
            parent_first_packages: Vec::new(),
            directly_indexed: HashMap::new(),
        };
        let loader = RunnerClassLoader::new(
            app,
            LoaderContext::default(),
            Arc::new(PlatformParent::new(vec![])),
            Arc::new(HeaderDefiner),
        );

        assert!(loader.negative.contains("logging.properties"));
        assert!(!loader.negative.contains("org/slf4j/impl/StaticLoggerBinder.class"));
        assert_eq!(loader.find_resource("/logging.properties").ok(), Some(None));
        assert_eq!(loader.stats().opens(), 0);
    }

    #[test]
    fn hot_window_bounds_open_handles_after_bootstrap() -> anyhow::Result<()> {
        let dir = temp_path("loader_window");
        std::fs::create_dir_all(&dir)?;
        let mut jars = Vec::new();
        for i in 0..6 {
            let jar = dir.join(format!("lib{i}.jar"));
            let name = format!("p{i}/r.txt");
            write_jar(&jar, &[(name.as_str(), b"x")])?;
            jars.push(jar);
        }
        let loader = loader_for(&jars, &[], Arc::new(PlatformParent::new(vec![])), Arc::new(HeaderDefiner))?;

        for i in 0..6 {
            assert!(loader.resource_bytes(&format!("p{i}/r.txt"))?.is_some());
        }
        assert_eq!(loader.stats().open_handles(), 6);

        loader.reset_internal_caches();
        assert_eq!(loader.stats().open_handles(), 0);
        assert!(loader.buffer_pool().is_disabled());

        for round in 0..2 {
            for i in 0..6 {
                assert!(loader.resource_bytes(&format!("p{i}/r.txt"))?.is_some(), "round {round}");
                assert!(loader.stats().open_handles() <= 4);
            }
        }

        loader.close();
        assert_eq!(loader.stats().open_handles(), 0);
        std::fs::remove_dir_all(dir)?;
        Ok(())
    }
}
