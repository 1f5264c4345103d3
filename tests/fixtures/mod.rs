//! Shared fixtures for integration tests
//!
//! Builds a throwaway source tree laid out like the project the default
//! pattern profile targets, so every default include pattern matches.

#![allow(dead_code)]

use std::fs;
use std::path::Path;

use cachegate::{CacheQuery, CompletionStore, Digest, DigestEngine, DigestType, KeySpace, MemoryStore};
use tempfile::TempDir;

/// Files present in every default tree
pub const DEFAULT_FILES: &[(&str, &str)] = &[
    ("CMakeLists.txt", "cmake_minimum_required(VERSION 3.18)\nproject(engine)\n"),
    ("cmake/deps.cmake", "find_package(CUDAToolkit)\n"),
    ("setup.py", "from setuptools import setup\nsetup(name='engine')\n"),
    ("pyproject.toml", "[build-system]\nrequires = ['setuptools']\n"),
    ("csrc/ops/add.cu", "__global__ void add(float* a) {}\n"),
    ("csrc/ops/add.cpp", "void add_cpu(float* a) {}\n"),
    ("include/engine/api.h", "#pragma once\nvoid add(float*);\n"),
    ("python/engine/__init__.py", "from .ops import add\n"),
    ("python/engine/ops.py", "def add(a, b):\n    return a + b\n"),
    ("python/engine/tests/test_ops.py", "def test_add():\n    assert True\n"),
    ("single_client/client.py", "class Client:\n    pass\n"),
    ("single_client/tests/test_client.py", "def test_client():\n    pass\n"),
    ("docs/index.md", "# Engine\n"),
    (".ci/test/run.sh", "#!/bin/sh\npytest\n"),
];

pub const OWNER: &str = "acme";
pub const REPO: &str = "engine";

pub struct SourceTree {
    dir: TempDir,
}

impl SourceTree {
    /// A tree with every file in [`DEFAULT_FILES`].
    pub fn new() -> Self {
        let tree = Self::empty();
        for (path, contents) in DEFAULT_FILES {
            tree.write(path, contents);
        }
        tree
    }

    pub fn empty() -> Self {
        Self {
            dir: TempDir::new().expect("create temp dir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    pub fn remove(&self, rel: &str) {
        fs::remove_file(self.dir.path().join(rel)).unwrap();
    }

    pub fn rename(&self, from: &str, to: &str) {
        let target = self.dir.path().join(to);
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::rename(self.dir.path().join(from), target).unwrap();
    }

    pub fn engine(&self) -> DigestEngine {
        DigestEngine::new(self.root())
    }

    pub fn digest(&self, digest_type: DigestType) -> Digest {
        self.engine().compute(digest_type.options()).unwrap()
    }
}

pub fn key_space() -> KeySpace {
    KeySpace::new(OWNER, REPO).unwrap()
}

/// A fresh per-run query against an in-memory store.
pub fn query<'a>(tree: &SourceTree, store: &'a MemoryStore) -> CacheQuery<'a, MemoryStore> {
    CacheQuery::new(tree.engine(), key_space(), CompletionStore::new(store))
}
