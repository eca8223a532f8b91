//! End-to-end catalog lifecycle: create, mutate, save, reload
//!
//! Every test works on its own temporary directory and disables locking unless the
//! lock itself is under test.

use rusqlite::Connection;
use std::path::Path;
use tempfile::TempDir;
use workbook_toc::{
    CatalogConfig, CatalogError, CatalogStore, ContainerResolver, NewPage, PageQuery, PageState,
    PersistenceManager, Result, SCHEMA_VERSION,
};

fn store() -> CatalogStore {
    CatalogStore::new(CatalogConfig::default().with_lock(false))
}

fn write_images(dir: &Path, names: &[&str]) {
    for name in names {
        std::fs::write(dir.join(name), name.as_bytes()).unwrap();
    }
}

#[test]
fn test_save_and_reload_preserves_every_field() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("toc.db");
    let manager = PersistenceManager::default();

    let mut catalog = store().open_in_memory()?;
    let plain = catalog.add_page(NewPage::new("scan_001.png"))?;
    let full = catalog.add_page(
        NewPage::new("book.tiff:2")
            .page_number(2)
            .form_type("PS2_REV_DEC_2016")
            .registered_filename("aligned/book_p2.png")
            .checksum("9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08")
            .comments("top margin cropped")
            .excluded(true),
    )?;
    let saved = manager.save(&mut catalog, Some(&target))?;
    assert_eq!(saved, target);

    let reloaded = store().open_from_file(&target)?;
    let before: Vec<_> = catalog.pages().collect::<Result<_>>()?;
    let after: Vec<_> = reloaded.pages().collect::<Result<_>>()?;
    assert_eq!(before, after);

    assert_eq!(reloaded.get_page(plain)?.filename, "scan_001.png");
    let entry = reloaded.get_page(full)?;
    assert_eq!(entry.page_number, 2);
    assert!(entry.excluded);
    assert_eq!(entry.state(), PageState::Registered);

    let metadata = reloaded.metadata()?;
    assert_eq!(metadata.schema_version, SCHEMA_VERSION);
    assert_eq!(metadata.last_saved, catalog.metadata()?.last_saved);
    assert!(metadata.last_saved.is_some());
    Ok(())
}

#[test]
fn test_save_into_directory_then_reload_from_it() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let mut catalog = store().open_in_memory()?;
    let id = catalog.add_page(NewPage::new("foo.tiff:1"))?;

    let saved = PersistenceManager::default().save(&mut catalog, Some(temp_dir.path()))?;
    assert_eq!(saved, temp_dir.path().join("toc.db"));

    let reloaded = store().load(Some(temp_dir.path()))?;
    let entries: Vec<_> = reloaded.pages().collect::<Result<_>>()?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].page_id, id);
    assert_eq!(entries[0].filename, "foo.tiff:1");
    Ok(())
}

#[test]
fn test_garbage_catalog_file_is_rejected_with_its_path() {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("toc.db");
    std::fs::write(&target, vec![b'x'; 4096]).unwrap();

    match store().load(Some(temp_dir.path())) {
        Err(CatalogError::InvalidMetadata { path, .. }) => assert_eq!(path, target),
        other => panic!("expected InvalidMetadata, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_page_ids_survive_reload_and_keep_increasing() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let mut catalog = store().create(temp_dir.path())?;
    let a = catalog.add_page(NewPage::new("a.png"))?;
    let b = catalog.add_page(NewPage::new("b.png"))?;
    PersistenceManager::default().save(&mut catalog, None)?;
    drop(catalog);

    let mut reloaded = store().load(Some(temp_dir.path()))?;
    assert_eq!(reloaded.get_page(a)?.filename, "a.png");
    assert_eq!(reloaded.get_page(b)?.filename, "b.png");

    let c = reloaded.add_page(NewPage::new("c.png"))?;
    assert!(c > b);
    Ok(())
}

#[test]
fn test_empty_catalog_round_trip() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("empty.db");

    let mut catalog = store().open_in_memory()?;
    PersistenceManager::default().save(&mut catalog, Some(&target))?;

    let reloaded = store().open_from_file(&target)?;
    assert!(reloaded.is_empty()?);
    assert_eq!(reloaded.pages().count(), 0);
    assert_eq!(reloaded.metadata()?.schema_version, SCHEMA_VERSION);
    Ok(())
}

#[test]
fn test_tampered_schema_version_is_rejected() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("toc.db");
    let mut catalog = store().open_in_memory()?;
    catalog.add_page(NewPage::new("a.png"))?;
    PersistenceManager::default().save(&mut catalog, Some(&target))?;

    let conn = Connection::open(&target)?;
    conn.execute("UPDATE toc_metadata SET schema_version = 2", [])?;
    drop(conn);

    match store().open_from_file(&target) {
        Err(CatalogError::SchemaVersionMismatch { path, expected, found }) => {
            assert_eq!(path, target);
            assert_eq!(expected, SCHEMA_VERSION);
            assert_eq!(found, Some(2));
        }
        Err(other) => panic!("expected SchemaVersionMismatch, got {:?}", other),
        Ok(_) => panic!("tampered catalog was accepted"),
    }
    Ok(())
}

#[test]
fn test_foreign_database_is_rejected() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("toc.db");
    let conn = Connection::open(&target)?;
    conn.execute_batch("CREATE TABLE unrelated (x INTEGER)")?;
    drop(conn);

    assert!(matches!(
        store().open_from_file(&target),
        Err(CatalogError::SchemaVersionMismatch { found: None, .. })
    ));
    Ok(())
}

#[test]
fn test_missing_catalog_names_the_container() {
    let temp_dir = TempDir::new().unwrap();
    match store().load(Some(temp_dir.path())) {
        Err(CatalogError::MissingCatalog { container }) => assert_eq!(container, temp_dir.path()),
        other => panic!("expected MissingCatalog, got {:?}", other.map(|_| ())),
    }
    assert!(matches!(
        store().open_from_file(temp_dir.path().join("nope.db")),
        Err(CatalogError::MissingCatalog { .. })
    ));
}

#[test]
fn test_locate_rules() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let resolver = ContainerResolver::default();
    let batch = temp_dir.path().join("batch");
    std::fs::create_dir(&batch).unwrap();
    let tiff = batch.join("workbook.tiff");
    std::fs::write(&tiff, b"II*\0").unwrap();
    let zip = batch.join("pages.zip");
    std::fs::write(&zip, b"PK").unwrap();

    assert_eq!(resolver.locate(None), None);
    assert_eq!(resolver.locate(Some(batch.as_path())), None);
    assert_eq!(resolver.locate(Some(tiff.as_path())), None);

    // Saving into each canonical location makes it discoverable
    let manager = PersistenceManager::default();
    manager.save(&mut store().create(&batch)?, None)?;
    manager.save(&mut store().create(&tiff)?, None)?;

    assert_eq!(resolver.locate(Some(batch.as_path())), Some(batch.join("toc.db")));
    assert_eq!(resolver.locate(Some(tiff.as_path())), Some(batch.join("workbook.toc.db")));
    assert_eq!(resolver.locate(Some(zip.as_path())), None);
    Ok(())
}

#[test]
fn test_ephemeral_catalog_binds_to_first_save() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let first = temp_dir.path().join("first.db");
    let manager = PersistenceManager::default();

    let mut catalog = store().open_in_memory()?;
    assert!(matches!(manager.save(&mut catalog, None), Err(CatalogError::NoSaveTarget)));

    manager.save(&mut catalog, Some(&first))?;
    catalog.add_page(NewPage::new("a.png"))?;
    assert_eq!(manager.save(&mut catalog, None)?, first);
    assert_eq!(store().open_from_file(&first)?.len()?, 1);
    Ok(())
}

#[test]
fn test_scan_classify_register_cycle() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    write_images(temp_dir.path(), &["scan_001.png", "scan_002.png", "scan_003.jpg"]);
    std::fs::write(temp_dir.path().join("README.txt"), b"not a page").unwrap();

    let config = CatalogConfig::default().with_lock(false);
    let store = CatalogStore::new(config.clone());
    let mut catalog = store.open_or_create(temp_dir.path())?;
    let container = catalog.container().cloned().unwrap();

    let listing = container.discover(&config, None)?;
    assert_eq!(listing.len(), 3);
    for key in listing.keys() {
        catalog.add_page(NewPage::from(key.clone()))?;
    }

    let unclassified = catalog.unclassified()?;
    assert_eq!(unclassified.len(), 3);
    for entry in &unclassified {
        catalog.set_classification(entry.page_id, "PS2_REV_DEC_2016", None)?;
    }
    let first = unclassified[0].page_id;
    catalog.add_registered_page(first, "aligned/scan_001.png")?;
    PersistenceManager::new(config.clone()).save(&mut catalog, None)?;
    drop(catalog);

    let catalog = store.open_or_create(temp_dir.path())?;
    assert!(catalog.unclassified()?.is_empty());
    assert_eq!(catalog.unregistered()?.len(), 2);
    assert_eq!(
        catalog
            .get_pages(PageQuery::all().form_type("PS2_REV_DEC_2016"))
            .count(),
        3
    );
    Ok(())
}
