// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};
use tally_app::{CsvOptions, Customer, CustomerFile, CustomerFileInput, CustomerFormInput, CustomerId};
use tally_db::Store;
use time::{Date, OffsetDateTime};
use tracing::{info, warn};

pub struct DbRuntime<'a> {
    store: &'a Store,
    export_dir: PathBuf,
    csv_options: CsvOptions,
}

impl<'a> DbRuntime<'a> {
    pub fn new(store: &'a Store, export_dir: PathBuf, csv_options: CsvOptions) -> Self {
        Self {
            store,
            export_dir,
            csv_options,
        }
    }
}

impl tally_tui::AppRuntime for DbRuntime<'_> {
    fn load_customers(&mut self) -> Result<Vec<Customer>> {
        self.store.list_customers()
    }

    fn add_customer(&mut self, input: &CustomerFormInput) -> Result<CustomerId> {
        self.store.create_customer(input)
    }

    fn update_customer(&mut self, id: CustomerId, input: &CustomerFormInput) -> Result<()> {
        self.store.update_customer(id, input)
    }

    fn delete_customer(&mut self, id: CustomerId) -> Result<()> {
        self.store.delete_customer(id)
    }

    fn attach_file(&mut self, id: CustomerId, path: &Path) -> Result<CustomerFile> {
        let input = read_file_input(path)?;
        self.store.attach_file(id, &input)
    }

    fn sales_staff(&mut self) -> Vec<String> {
        self.store
            .sales_staff()
            .iter()
            .map(|name| (*name).to_owned())
            .collect()
    }

    fn export_csv(&mut self) -> Result<PathBuf> {
        self.store
            .export_customers_csv(&self.export_dir, self.csv_options, today())
    }
}

/// Loads a file from disk for attachment, naming it after the path's final
/// component.
pub fn read_file_input(path: &Path) -> Result<CustomerFileInput> {
    let metadata =
        fs::metadata(path).with_context(|| format!("stat {} -- check the path", path.display()))?;
    if !metadata.is_file() {
        bail!("{} is not a regular file -- choose a file and retry", path.display());
    }
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_owned)
        .with_context(|| format!("{} has no usable file name", path.display()))?;
    let data = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    info!(file = %path.display(), bytes = data.len(), "read attachment");
    Ok(CustomerFileInput {
        mime_type: guess_mime_type(path).to_owned(),
        file_name,
        data,
    })
}

pub fn guess_mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|extension| extension.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}

pub fn today() -> Date {
    match OffsetDateTime::now_local() {
        Ok(now) => now.date(),
        Err(error) => {
            warn!(%error, "local offset unavailable, using UTC date");
            OffsetDateTime::now_utc().date()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DbRuntime, guess_mime_type, read_file_input};
    use anyhow::Result;
    use std::path::Path;
    use tally_app::{CsvOptions, CustomerFormInput, CustomerId};
    use tally_db::{SALES_STAFF, Store};
    use tally_tui::AppRuntime;

    fn store() -> Result<Store> {
        let store = Store::open_memory()?;
        store.bootstrap()?;
        Ok(store)
    }

    fn customer_input(name: &str, phone: &str) -> CustomerFormInput {
        CustomerFormInput {
            name: name.to_owned(),
            phone: phone.to_owned(),
            ..CustomerFormInput::default()
        }
    }

    #[test]
    fn customer_mutations_flow_through_store() -> Result<()> {
        let store = store()?;
        let dir = tempfile::tempdir()?;
        let mut runtime =
            DbRuntime::new(&store, dir.path().to_path_buf(), CsvOptions::default());

        let id = runtime.add_customer(&customer_input("张伟", "13800001111"))?;
        runtime.update_customer(id, &customer_input("张伟民", "13800001111"))?;
        let customers = runtime.load_customers()?;
        assert_eq!(customers.len(), 1);
        assert_eq!(customers[0].name, "张伟民");

        runtime.delete_customer(id)?;
        assert!(runtime.load_customers()?.is_empty());
        assert!(runtime.delete_customer(CustomerId::new(77)).is_err());
        Ok(())
    }

    #[test]
    fn attach_file_reads_from_disk() -> Result<()> {
        let store = store()?;
        let dir = tempfile::tempdir()?;
        let mut runtime =
            DbRuntime::new(&store, dir.path().to_path_buf(), CsvOptions::default());
        let id = runtime.add_customer(&customer_input("李娜", "13912345678"))?;

        let path = dir.path().join("contract.PDF");
        std::fs::write(&path, b"%PDF-1.7")?;
        let file = runtime.attach_file(id, &path)?;
        assert_eq!(file.file_name, "contract.PDF");
        assert_eq!(file.mime_type, "application/pdf");
        assert_eq!(file.size_bytes, 8);
        assert_eq!(store.list_files(id)?.len(), 1);
        Ok(())
    }

    #[test]
    fn attach_file_rejects_missing_and_directory_paths() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(read_file_input(&dir.path().join("missing.png")).is_err());

        let error = read_file_input(dir.path()).expect_err("directories are not files");
        assert!(error.to_string().contains("not a regular file"));
        Ok(())
    }

    #[test]
    fn export_writes_into_configured_dir() -> Result<()> {
        let store = store()?;
        let dir = tempfile::tempdir()?;
        let export_dir = dir.path().join("exports");
        let mut runtime = DbRuntime::new(&store, export_dir.clone(), CsvOptions { utf8_bom: true });

        assert!(runtime.export_csv().is_err());

        runtime.add_customer(&customer_input("王芳", "15000000001"))?;
        let path = runtime.export_csv()?;
        assert!(path.starts_with(&export_dir));
        let contents = std::fs::read_to_string(&path)?;
        assert!(contents.starts_with('\u{feff}'));
        assert!(contents.contains("王芳"));
        Ok(())
    }

    #[test]
    fn sales_staff_mirrors_store_roster() -> Result<()> {
        let store = store()?;
        let mut runtime = DbRuntime::new(&store, ".".into(), CsvOptions::default());
        assert_eq!(runtime.sales_staff(), SALES_STAFF.map(str::to_owned).to_vec());
        Ok(())
    }

    #[test]
    fn mime_type_guess_is_case_insensitive() {
        assert_eq!(guess_mime_type(Path::new("scan.JPG")), "image/jpeg");
        assert_eq!(guess_mime_type(Path::new("notes.txt")), "text/plain");
        assert_eq!(guess_mime_type(Path::new("blob")), "application/octet-stream");
    }
}
