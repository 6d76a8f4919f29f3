use crate::db::DB;
use rlimit::Resource;
use std::cmp::min;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Copy, Clone)]
pub struct Unspecified;

#[derive(Debug, Clone)]
pub struct ConnBuilder<Path: Clone> {
    db_path: Path,
    create_if_missing: bool,
    parallelism: usize,
    files_limit: i32,
    mem_budget: usize,
}

impl Default for ConnBuilder<Unspecified> {
    fn default() -> Self {
        ConnBuilder { db_path: Unspecified, create_if_missing: true, parallelism: 1, files_limit: 500, mem_budget: 64 * 1024 * 1024 }
    }
}

impl<Path: Clone> ConnBuilder<Path> {
    pub fn with_db_path(self, db_path: PathBuf) -> ConnBuilder<PathBuf> {
        ConnBuilder {
            db_path,
            create_if_missing: self.create_if_missing,
            parallelism: self.parallelism,
            files_limit: self.files_limit,
            mem_budget: self.mem_budget,
        }
    }
    pub fn with_create_if_missing(self, create_if_missing: bool) -> ConnBuilder<Path> {
        ConnBuilder { create_if_missing, ..self }
    }
    pub fn with_parallelism(self, parallelism: impl Into<usize>) -> ConnBuilder<Path> {
        ConnBuilder { parallelism: parallelism.into(), ..self }
    }
    pub fn with_files_limit(self, files_limit: impl Into<i32>) -> ConnBuilder<Path> {
        ConnBuilder { files_limit: files_limit.into(), ..self }
    }
    pub fn with_mem_budget(self, mem_budget: impl Into<usize>) -> ConnBuilder<Path> {
        ConnBuilder { mem_budget: mem_budget.into(), ..self }
    }
}

impl ConnBuilder<PathBuf> {
    pub fn build(self) -> Result<Arc<DB>, rocksdb::Error> {
        let mut opts = rocksdb::Options::default();
        if self.parallelism > 1 {
            opts.increase_parallelism(self.parallelism as i32);
        }
        opts.optimize_level_style_compaction(self.mem_budget);

        #[cfg(target_os = "windows")]
        let files_limit = rlimit::getmaxstdio() as i32;
        #[cfg(any(target_os = "macos", target_os = "linux"))]
        let files_limit = rlimit::getrlimit(Resource::NOFILE).unwrap().0 as i32;
        // In most linux environments the limit is set to 1024, so we use 500 to give sufficient slack.
        opts.set_max_open_files(min(files_limit, self.files_limit));
        opts.create_if_missing(self.create_if_missing);

        let inner = rocksdb::DBWithThreadMode::<rocksdb::MultiThreaded>::open(&opts, self.db_path.to_str().unwrap())?;
        Ok(Arc::new(DB::new(inner)))
    }
}
