use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use proptest::prelude::*;

use gridbase::{
    Catalog, DataLayer, Error, MemoryStorage, QueryRequest, Result, RowPatch, SchemaBuilder,
    SelectPlan, StorageDriver, UnitOfWork, Value, MAX_BATCH_ASSIGNMENTS,
};

fn text(s: &str) -> Value {
    Value::Text(s.into())
}

fn catalog() -> Result<Arc<Catalog>> {
    let _ = tracing_subscriber::fmt().try_init();
    Ok(Arc::new(
        SchemaBuilder::new()
            .table("products")
            .primary_key("id", "INTEGER")
            .required("name", "VARCHAR(100)")
            .column("price", "DOUBLE")
            .column("stock", "INTEGER")
            .finish()
            .build()?,
    ))
}

/// Records the assignment count of every insert and update batch a merge
/// hands to the driver, delegating the actual work to [`MemoryStorage`].
struct CountingDriver {
    inner: MemoryStorage,
    insert_batches: Arc<Mutex<Vec<usize>>>,
    update_batches: Arc<Mutex<Vec<usize>>>,
}

impl CountingDriver {
    fn new(catalog: &Catalog) -> Self {
        Self {
            inner: MemoryStorage::new(catalog),
            insert_batches: Arc::default(),
            update_batches: Arc::default(),
        }
    }

    fn insert_batches(&self) -> Vec<usize> {
        self.insert_batches.lock().unwrap().clone()
    }

    fn update_batches(&self) -> Vec<usize> {
        self.update_batches.lock().unwrap().clone()
    }

    fn reset(&self) {
        self.insert_batches.lock().unwrap().clear();
        self.update_batches.lock().unwrap().clear();
    }
}

impl StorageDriver for CountingDriver {
    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>> {
        Ok(Box::new(CountingUow {
            inner: self.inner.begin()?,
            insert_batches: Arc::clone(&self.insert_batches),
            update_batches: Arc::clone(&self.update_batches),
        }))
    }
}

struct CountingUow<'a> {
    inner: Box<dyn UnitOfWork + 'a>,
    insert_batches: Arc<Mutex<Vec<usize>>>,
    update_batches: Arc<Mutex<Vec<usize>>>,
}

fn assignments(patches: &[RowPatch]) -> usize {
    patches.iter().map(RowPatch::len).sum()
}

impl UnitOfWork for CountingUow<'_> {
    fn select(&mut self, plan: &SelectPlan) -> Result<Vec<Vec<Value>>> {
        self.inner.select(plan)
    }

    fn select_column(&mut self, table: &str, column: &str) -> Result<Vec<Value>> {
        self.inner.select_column(table, column)
    }

    fn select_where_in(
        &mut self,
        table: &str,
        columns: &[String],
        pk_column: &str,
        ids: &[Value],
    ) -> Result<Vec<Vec<Value>>> {
        self.inner.select_where_in(table, columns, pk_column, ids)
    }

    fn insert_many(
        &mut self,
        table: &str,
        rows: &[RowPatch],
        pk_column: &str,
    ) -> Result<Vec<Value>> {
        self.insert_batches.lock().unwrap().push(assignments(rows));
        self.inner.insert_many(table, rows, pk_column)
    }

    fn update_many(&mut self, table: &str, patches: &[RowPatch], pk_column: &str) -> Result<()> {
        self.update_batches.lock().unwrap().push(assignments(patches));
        self.inner.update_many(table, patches, pk_column)
    }

    fn delete_where_in(&mut self, table: &str, pk_column: &str, ids: &[Value]) -> Result<usize> {
        self.inner.delete_where_in(table, pk_column, ids)
    }

    fn commit(self: Box<Self>) -> Result<()> {
        self.inner.commit()
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        self.inner.rollback()
    }
}

fn header() -> Vec<Value> {
    vec![text("id"), text("name"), text("price"), text("stock")]
}

fn product(id: i64, name: &str, price: f64, stock: i64) -> Vec<Value> {
    vec![
        Value::Int(id),
        text(name),
        Value::Float(price),
        Value::Int(stock),
    ]
}

#[test]
fn merge_returns_keys_in_input_order() -> Result<()> {
    let catalog = catalog()?;
    let layer = DataLayer::new(Arc::clone(&catalog), Arc::new(MemoryStorage::new(&catalog)));

    let first = layer.merge(
        "products",
        &[
            header(),
            product(0, "bolt", 0.10, 500),
            product(0, "nut", 0.05, 900),
        ],
    )?;
    assert_eq!(first, vec![Value::Int(1), Value::Int(2)]);

    // A second matrix mixing an existing key, a new row, and another
    // existing key keeps positional correspondence.
    let second = layer.merge(
        "products",
        &[
            header(),
            product(2, "nut", 0.06, 900),
            product(0, "washer", 0.02, 1200),
            product(1, "bolt", 0.10, 450),
        ],
    )?;
    assert_eq!(second, vec![Value::Int(2), Value::Int(3), Value::Int(1)]);
    Ok(())
}

#[test]
fn merge_is_idempotent_and_skips_unchanged_rows() -> Result<()> {
    let catalog = catalog()?;
    let driver = Arc::new(CountingDriver::new(&catalog));
    let layer = DataLayer::new(Arc::clone(&catalog), Arc::clone(&driver) as Arc<dyn StorageDriver>);

    let matrix = vec![
        header(),
        product(0, "bolt", 0.10, 500),
        product(0, "nut", 0.05, 900),
    ];
    let first = layer.merge("products", &matrix)?;
    assert_eq!(driver.insert_batches().len(), 1);
    driver.reset();

    // Re-merging under the keys just handed back writes nothing.
    let replay = vec![
        header(),
        product(1, "bolt", 0.10, 500),
        product(2, "nut", 0.05, 900),
    ];
    let second = layer.merge("products", &replay)?;
    assert_eq!(second, first);
    assert!(driver.insert_batches().is_empty());
    assert!(driver.update_batches().is_empty());
    Ok(())
}

#[test]
fn changed_fields_produce_one_bounded_update() -> Result<()> {
    let catalog = catalog()?;
    let driver = Arc::new(CountingDriver::new(&catalog));
    let layer = DataLayer::new(Arc::clone(&catalog), Arc::clone(&driver) as Arc<dyn StorageDriver>);

    layer.merge(
        "products",
        &[
            header(),
            product(0, "bolt", 0.10, 500),
            product(0, "nut", 0.05, 900),
        ],
    )?;
    driver.reset();

    layer.merge(
        "products",
        &[
            header(),
            product(1, "bolt", 0.12, 500),
            product(2, "nut", 0.05, 900),
        ],
    )?;
    // One update batch, carrying only the key and the changed price.
    assert_eq!(driver.update_batches(), vec![2]);
    assert!(driver.insert_batches().is_empty());
    Ok(())
}

#[test]
fn thousand_new_rows_split_into_bounded_batches() -> Result<()> {
    let catalog = catalog()?;
    let driver = Arc::new(CountingDriver::new(&catalog));
    let layer = DataLayer::new(Arc::clone(&catalog), Arc::clone(&driver) as Arc<dyn StorageDriver>);

    let mut matrix = vec![header()];
    for i in 0..1000 {
        matrix.push(product(0, &format!("part-{i}"), f64::from(i) * 0.01, i64::from(i)));
    }
    let keys = layer.merge("products", &matrix)?;

    assert_eq!(keys.len(), 1000);
    let distinct: HashSet<&Value> = keys.iter().collect();
    assert_eq!(distinct.len(), 1000);

    // 3 assignments per row (autoincrement key excluded), 3000 total.
    let batches = driver.insert_batches();
    assert!(batches.len() >= 2, "expected several batches, got {batches:?}");
    assert!(batches.iter().all(|&a| a <= MAX_BATCH_ASSIGNMENTS));
    assert_eq!(batches.iter().sum::<usize>(), 3000);
    Ok(())
}

#[test]
fn header_must_start_with_the_primary_key() -> Result<()> {
    let catalog = catalog()?;
    let layer = DataLayer::new(Arc::clone(&catalog), Arc::new(MemoryStorage::new(&catalog)));
    let err = layer
        .merge(
            "products",
            &[
                vec![text("name"), text("id")],
                vec![text("bolt"), Value::Int(0)],
            ],
        )
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    Ok(())
}

#[test]
fn ragged_row_is_rejected_with_its_index() -> Result<()> {
    let catalog = catalog()?;
    let layer = DataLayer::new(Arc::clone(&catalog), Arc::new(MemoryStorage::new(&catalog)));
    let err = layer
        .merge(
            "products",
            &[
                header(),
                product(0, "bolt", 0.10, 500),
                vec![Value::Int(0), text("nut")],
            ],
        )
        .unwrap_err();
    assert_eq!(
        err,
        Error::Validation("matrix row 2 has 2 cells, header has 4".into())
    );
    Ok(())
}

#[test]
fn merge_into_unknown_table_is_a_schema_error() -> Result<()> {
    let catalog = catalog()?;
    let layer = DataLayer::new(Arc::clone(&catalog), Arc::new(MemoryStorage::new(&catalog)));
    let err = layer.merge("ghosts", &[header()]).unwrap_err();
    assert_eq!(err, Error::UnknownTable("ghosts".into()));
    Ok(())
}

#[test]
fn delete_removes_only_the_named_keys() -> Result<()> {
    let catalog = catalog()?;
    let layer = DataLayer::new(Arc::clone(&catalog), Arc::new(MemoryStorage::new(&catalog)));
    layer.merge(
        "products",
        &[
            header(),
            product(0, "bolt", 0.10, 500),
            product(0, "nut", 0.05, 900),
            product(0, "washer", 0.02, 1200),
        ],
    )?;

    // Text keys coerce against the key column's type before the delete.
    layer.delete("products", &[text("1"), Value::Int(3)])?;

    let rows = layer.query(&QueryRequest::new(
        vec!["name".into()],
        vec!["products".into()],
    ))?;
    assert_eq!(rows, vec![vec![text("nut")]]);
    Ok(())
}

#[test]
fn delete_with_no_ids_is_rejected() -> Result<()> {
    let catalog = catalog()?;
    let layer = DataLayer::new(Arc::clone(&catalog), Arc::new(MemoryStorage::new(&catalog)));
    assert!(matches!(
        layer.delete("products", &[]).unwrap_err(),
        Error::Validation(_)
    ));
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Inserting any number of new rows yields that many distinct keys and
    /// never hands the driver a batch above the assignment bound.
    #[test]
    fn insert_batches_stay_bounded(row_count in 1usize..600) {
        let catalog = catalog().unwrap();
        let driver = Arc::new(CountingDriver::new(&catalog));
        let layer =
            DataLayer::new(Arc::clone(&catalog), Arc::clone(&driver) as Arc<dyn StorageDriver>);

        let mut matrix = vec![header()];
        for i in 0..row_count {
            matrix.push(product(0, &format!("part-{i}"), 1.0, i as i64));
        }
        let keys = layer.merge("products", &matrix).unwrap();

        prop_assert_eq!(keys.len(), row_count);
        let distinct: HashSet<&Value> = keys.iter().collect();
        prop_assert_eq!(distinct.len(), row_count);
        for batch in driver.insert_batches() {
            prop_assert!(batch <= MAX_BATCH_ASSIGNMENTS);
        }
        prop_assert_eq!(
            driver.insert_batches().iter().sum::<usize>(),
            row_count * 3
        );
    }
}
