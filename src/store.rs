use crate::error::{PipelineError, Result};
use crate::structs::{
    AttributeValue, Item, LEGACY_TIME_FIELD, RawRecord, RawTable, StoreConfig, TIME_FIELD,
};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// One page of a scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanPage {
    pub items: Vec<Item>,
    /// Continuation token; `None` once the table is exhausted.
    pub last_evaluated_key: Option<Item>,
}

/// A key-value store that can be read with scan-with-continuation-token.
pub trait ScanStore {
    /// Returns the page starting right after `exclusive_start_key`, or the
    /// first page when no key is given.
    fn scan(&self, table_name: &str, exclusive_start_key: Option<&Item>) -> Result<ScanPage>;
}

/// Reads every record of `table_name`, following continuation tokens until
/// the store stops returning one.
///
/// Items are appended in page order. An empty table yields an empty vector.
///
/// # Errors
///
/// Returns `PipelineError` if:
/// - The store fails to serve a page
/// - The store hands back a continuation token it already returned
/// - An item lacks one of the tag attributes
pub fn load_all_records<S: ScanStore + ?Sized>(store: &S, table_name: &str) -> Result<RawTable> {
    let mut items: Vec<Item> = Vec::new();
    let mut page = store.scan(table_name, None)?;
    let mut pages = 1;
    let mut seen_tokens: HashSet<Item> = HashSet::new();
    debug!("Scan page {} returned {} items", pages, page.items.len());
    items.append(&mut page.items);

    while let Some(token) = page.last_evaluated_key.take() {
        if !seen_tokens.insert(token.clone()) {
            return Err(PipelineError::Store(format!(
                "scan of '{}' repeated a continuation token after page {}",
                table_name, pages
            )));
        }
        page = store.scan(table_name, Some(&token))?;
        pages += 1;
        debug!("Scan page {} returned {} items", pages, page.items.len());
        items.append(&mut page.items);
    }

    info!(
        "Loaded {} items from '{}' in {} page(s)",
        items.len(),
        table_name,
        pages
    );

    items
        .iter()
        .enumerate()
        .map(|(index, item)| RawRecord::from_item(index, item))
        .collect()
}

/// On-disk table export in the store's JSON format: `{"Items": [...]}`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TableExport {
    #[serde(rename = "Items")]
    pub items: Vec<Item>,
}

/// Scan store backed by JSON table exports laid out as
/// `<data_dir>/<region>/<table_name>.json`.
///
/// Pages hold at most `page_size` items; the continuation token is the key
/// attributes of the last item returned. Each export is parsed once per
/// store and must not repeat a key.
#[derive(Debug, Clone)]
pub struct FileStore {
    region_dir: PathBuf,
    page_size: usize,
    key_attributes: Vec<String>,
    tables: RefCell<HashMap<String, Rc<IndexedTable>>>,
}

/// Parsed export with the position of every keyed item.
#[derive(Debug)]
struct IndexedTable {
    items: Vec<Item>,
    positions: HashMap<Item, usize>,
}

impl FileStore {
    /// # Errors
    ///
    /// Returns `PipelineError::StoreConnection` if the region directory does
    /// not exist or the configuration cannot produce pages.
    pub fn connect(config: &StoreConfig) -> Result<Self> {
        if config.page_size == 0 {
            return Err(PipelineError::StoreConnection(
                "page size must be at least 1".to_string(),
            ));
        }
        if config.key_attributes.is_empty() {
            return Err(PipelineError::StoreConnection(
                "at least one key attribute is required".to_string(),
            ));
        }
        let region_dir = config.data_dir.join(&config.region);
        if !region_dir.is_dir() {
            return Err(PipelineError::StoreConnection(format!(
                "region '{}' not available under {}",
                config.region,
                config.data_dir.display()
            )));
        }
        debug!(
            "Connected to file store at {} (page size {})",
            region_dir.display(),
            config.page_size
        );
        Ok(Self {
            region_dir,
            page_size: config.page_size,
            key_attributes: config.key_attributes.clone(),
            tables: RefCell::new(HashMap::new()),
        })
    }

    pub fn table_path(&self, table_name: &str) -> PathBuf {
        self.region_dir.join(format!("{}.json", table_name))
    }

    fn table(&self, table_name: &str) -> Result<Rc<IndexedTable>> {
        if let Some(table) = self.tables.borrow().get(table_name) {
            return Ok(Rc::clone(table));
        }
        let table = Rc::new(self.read_table(table_name)?);
        self.tables
            .borrow_mut()
            .insert(table_name.to_string(), Rc::clone(&table));
        Ok(table)
    }

    fn read_table(&self, table_name: &str) -> Result<IndexedTable> {
        let path = self.table_path(table_name);
        let file = File::open(&path).map_err(|e| {
            PipelineError::Store(format!("cannot open table '{}': {}", table_name, e))
        })?;
        let export: TableExport = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            PipelineError::Store(format!("table '{}' is unreadable: {}", table_name, e))
        })?;

        let mut positions = HashMap::with_capacity(export.items.len());
        for (i, item) in export.items.iter().enumerate() {
            // Unkeyed items are only a problem if a page has to end on one.
            let Ok(key) = self.key_of(item) else { continue };
            if let Some(first) = positions.insert(key, i) {
                return Err(PipelineError::Store(format!(
                    "table '{}' repeats the key of item {} at item {}",
                    table_name, first, i
                )));
            }
        }
        debug!(
            "Parsed table '{}' with {} items",
            table_name,
            export.items.len()
        );

        Ok(IndexedTable {
            items: export.items,
            positions,
        })
    }

    /// Key attributes of `item`; `time` falls back to the legacy `Time` key.
    fn key_of(&self, item: &Item) -> Result<Item> {
        self.key_attributes
            .iter()
            .map(|name| {
                let value = item.get(name).or_else(|| {
                    (name == TIME_FIELD)
                        .then(|| item.get(LEGACY_TIME_FIELD))
                        .flatten()
                });
                value
                    .map(|value| (name.clone(), value.clone()))
                    .ok_or_else(|| {
                        PipelineError::Store(format!("item lacks key attribute '{}'", name))
                    })
            })
            .collect()
    }
}

impl ScanStore for FileStore {
    fn scan(&self, table_name: &str, exclusive_start_key: Option<&Item>) -> Result<ScanPage> {
        let table = self.table(table_name)?;

        let start = match exclusive_start_key {
            None => 0,
            Some(key) => table.positions.get(key).map(|i| i + 1).ok_or_else(|| {
                PipelineError::Store(format!(
                    "continuation token does not match any item of '{}'",
                    table_name
                ))
            })?,
        };

        let total = table.items.len();
        let end = (start + self.page_size).min(total);
        let page = table.items[start..end].to_vec();
        let last_evaluated_key = match page.last() {
            Some(last) if end < total => Some(self.key_of(last)?),
            _ => None,
        };

        Ok(ScanPage {
            items: page,
            last_evaluated_key,
        })
    }
}

/// Writes `items` as a table export readable by [`FileStore`].
pub fn write_table_export(items: &[Item], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    let export = TableExport {
        items: items.to_vec(),
    };
    serde_json::to_writer_pretty(file, &export)?;
    Ok(())
}

/// In-memory store serving a fixed sequence of pages.
///
/// The continuation token names the next page index.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    table_name: String,
    pages: Vec<Vec<Item>>,
}

const PAGE_TOKEN: &str = "page";

impl MemoryStore {
    pub fn new(table_name: impl Into<String>, pages: Vec<Vec<Item>>) -> Self {
        Self {
            table_name: table_name.into(),
            pages,
        }
    }

    /// Splits `items` into pages of `page_size` items.
    pub fn paged(table_name: impl Into<String>, items: Vec<Item>, page_size: usize) -> Self {
        let pages = items
            .chunks(page_size.max(1))
            .map(|chunk| chunk.to_vec())
            .collect();
        Self::new(table_name, pages)
    }
}

impl ScanStore for MemoryStore {
    fn scan(&self, table_name: &str, exclusive_start_key: Option<&Item>) -> Result<ScanPage> {
        if table_name != self.table_name {
            return Err(PipelineError::Store(format!(
                "requested table '{}' not found",
                table_name
            )));
        }

        let index = match exclusive_start_key {
            None => 0,
            Some(key) => key
                .get(PAGE_TOKEN)
                .and_then(AttributeValue::as_text)
                .and_then(|s| s.parse::<usize>().ok())
                .ok_or_else(|| PipelineError::Store("invalid continuation token".to_string()))?,
        };

        let items = self.pages.get(index).cloned().unwrap_or_default();
        let last_evaluated_key = (index + 1 < self.pages.len()).then(|| {
            Item::from([(
                PAGE_TOKEN.to_string(),
                AttributeValue::N((index + 1).to_string()),
            )])
        });

        Ok(ScanPage {
            items,
            last_evaluated_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::DEFAULT_TABLE;

    fn reading(device: &str, time: i64) -> Item {
        Item::from([
            ("time".to_string(), AttributeValue::N(time.to_string())),
            ("value".to_string(), AttributeValue::N("1.5".to_string())),
            ("sensor_type".to_string(), AttributeValue::S("Pressure".to_string())),
            ("location".to_string(), AttributeValue::S("Warehouse_1".to_string())),
            ("device_id".to_string(), AttributeValue::S(device.to_string())),
        ])
    }

    fn file_store(dir: &Path, items: &[Item], page_size: usize) -> FileStore {
        let config = StoreConfig {
            data_dir: dir.to_path_buf(),
            page_size,
            ..StoreConfig::default()
        };
        write_table_export(
            items,
            &dir.join(&config.region).join(format!("{}.json", config.table_name)),
        )
        .unwrap();
        FileStore::connect(&config).unwrap()
    }

    #[test]
    fn memory_store_follows_tokens_across_pages() {
        let store = MemoryStore::new(
            "t",
            vec![vec![reading("d1", 1)], vec![], vec![reading("d2", 2)]],
        );
        let table = load_all_records(&store, "t").unwrap();
        let devices: Vec<_> = table.iter().map(|r| r.device_id.as_str()).collect();
        assert_eq!(devices, ["d1", "d2"]);
    }

    #[test]
    fn empty_store_yields_empty_table() {
        let store = MemoryStore::new("t", vec![]);
        assert!(load_all_records(&store, "t").unwrap().is_empty());
    }

    #[test]
    fn unknown_table_is_a_store_error() {
        let store = MemoryStore::new("t", vec![vec![reading("d1", 1)]]);
        assert!(matches!(
            load_all_records(&store, "other"),
            Err(PipelineError::Store(_))
        ));
    }

    #[test]
    fn repeated_token_is_rejected() {
        struct Stuck;
        impl ScanStore for Stuck {
            fn scan(&self, _: &str, _: Option<&Item>) -> Result<ScanPage> {
                Ok(ScanPage {
                    items: vec![],
                    last_evaluated_key: Some(Item::from([(
                        "k".to_string(),
                        AttributeValue::S("same".to_string()),
                    )])),
                })
            }
        }
        assert!(matches!(
            load_all_records(&Stuck, "t"),
            Err(PipelineError::Store(_))
        ));
    }

    #[test]
    fn file_store_pages_by_page_size() {
        let dir = tempfile::tempdir().unwrap();
        let items: Vec<Item> = (0..5).map(|i| reading("d1", i)).collect();
        let store = file_store(dir.path(), &items, 2);

        let first = store.scan(DEFAULT_TABLE, None).unwrap();
        assert_eq!(first.items.len(), 2);
        let token = first.last_evaluated_key.unwrap();
        assert_eq!(token.len(), 2);
        assert_eq!(token["time"], AttributeValue::N("1".to_string()));

        let table = load_all_records(&store, DEFAULT_TABLE).unwrap();
        assert_eq!(table.len(), 5);
    }

    #[test]
    fn file_store_last_page_has_no_token() {
        let dir = tempfile::tempdir().unwrap();
        let items: Vec<Item> = (0..4).map(|i| reading("d1", i)).collect();
        let store = file_store(dir.path(), &items, 2);

        let first = store.scan(DEFAULT_TABLE, None).unwrap();
        let second = store
            .scan(DEFAULT_TABLE, first.last_evaluated_key.as_ref())
            .unwrap();
        assert_eq!(second.items.len(), 2);
        assert!(second.last_evaluated_key.is_none());
    }

    #[test]
    fn file_store_missing_region_fails_to_connect() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            data_dir: dir.path().to_path_buf(),
            region: "eu-west-1".to_string(),
            ..StoreConfig::default()
        };
        assert!(matches!(
            FileStore::connect(&config),
            Err(PipelineError::StoreConnection(_))
        ));
    }

    #[test]
    fn file_store_missing_table_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(dir.path(), &[], 10);
        assert!(matches!(
            store.scan("missing", None),
            Err(PipelineError::Store(_))
        ));
        assert!(load_all_records(&store, DEFAULT_TABLE).unwrap().is_empty());
    }

    #[test]
    fn token_cycle_across_pages_is_rejected() {
        struct Cycling;
        impl ScanStore for Cycling {
            fn scan(&self, _: &str, key: Option<&Item>) -> Result<ScanPage> {
                let next = match key.and_then(|k| k.get("k")).and_then(AttributeValue::as_text) {
                    Some("a") => "b",
                    _ => "a",
                };
                Ok(ScanPage {
                    items: vec![reading("d1", 1)],
                    last_evaluated_key: Some(Item::from([(
                        "k".to_string(),
                        AttributeValue::S(next.to_string()),
                    )])),
                })
            }
        }
        assert!(matches!(
            load_all_records(&Cycling, "t"),
            Err(PipelineError::Store(_))
        ));
    }

    #[test]
    fn file_store_pages_legacy_time_keys() {
        let dir = tempfile::tempdir().unwrap();
        let items: Vec<Item> = (0..3)
            .map(|i| {
                let mut item = reading(&format!("d{i}"), i);
                let time = item.remove("time").unwrap();
                item.insert("Time".to_string(), time);
                item
            })
            .collect();
        let store = file_store(dir.path(), &items, 2);

        let first = store.scan(DEFAULT_TABLE, None).unwrap();
        let token = first.last_evaluated_key.unwrap();
        assert_eq!(token["time"], AttributeValue::N("1".to_string()));

        let table = load_all_records(&store, DEFAULT_TABLE).unwrap();
        let devices: Vec<_> = table.iter().map(|r| r.device_id.as_str()).collect();
        assert_eq!(devices, ["d0", "d1", "d2"]);
    }

    #[test]
    fn file_store_rejects_duplicate_keys() {
        let dir = tempfile::tempdir().unwrap();
        let items = vec![
            reading("d1", 1),
            reading("d2", 2),
            reading("d1", 1),
            reading("d3", 3),
        ];
        let store = file_store(dir.path(), &items, 1);
        match load_all_records(&store, DEFAULT_TABLE) {
            Err(PipelineError::Store(message)) => assert!(message.contains("repeats the key")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn file_store_parses_each_table_once() {
        let dir = tempfile::tempdir().unwrap();
        let items: Vec<Item> = (0..3).map(|i| reading("d1", i)).collect();
        let store = file_store(dir.path(), &items, 2);

        let first = store.scan(DEFAULT_TABLE, None).unwrap();
        fs::remove_file(store.table_path(DEFAULT_TABLE)).unwrap();
        let second = store
            .scan(DEFAULT_TABLE, first.last_evaluated_key.as_ref())
            .unwrap();
        assert_eq!(second.items, [reading("d1", 2)]);
        assert!(second.last_evaluated_key.is_none());
    }
}
