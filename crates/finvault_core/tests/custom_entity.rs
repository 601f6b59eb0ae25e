use finvault_core::db::{open_db_in_memory, DbResult};
use finvault_core::{
    Bill, Entity, ErrorKind, IsolationLevel, RecordRepository, RecordStore,
    RecordValidationError, StoreError, TransactionOptions,
};
use rusqlite::types::Value;
use rusqlite::{Connection, Row};

/// Payment recorded against a stored bill.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Payment {
    bill_id: String,
    paid_cents: i64,
}

#[derive(Debug, Default)]
struct PaymentPatch {
    paid_cents: Option<i64>,
}

impl Entity for Payment {
    const TABLE: &'static str = "payments";
    const COLUMNS: &'static [&'static str] = &["bill_id", "paid_cents"];

    type Patch = PaymentPatch;

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.bill_id.clone()),
            Value::Integer(self.paid_cents),
        ]
    }

    fn from_row(row: &Row<'_>) -> DbResult<Self> {
        Ok(Self {
            bill_id: row.get("bill_id")?,
            paid_cents: row.get("paid_cents")?,
        })
    }

    fn apply_patch(&mut self, patch: &PaymentPatch) {
        if let Some(paid_cents) = patch.paid_cents {
            self.paid_cents = paid_cents;
        }
    }

    fn validate(&self) -> Result<(), RecordValidationError> {
        if self.paid_cents <= 0 {
            return Err(RecordValidationError::new(
                Self::TABLE,
                "paid_cents",
                "must be positive",
            ));
        }
        Ok(())
    }
}

/// Entity whose business columns shadow a lifecycle column.
struct Shadowing;

impl Entity for Shadowing {
    const TABLE: &'static str = "payments";
    const COLUMNS: &'static [&'static str] = &["paid_cents", "created_at"];

    type Patch = ();

    fn to_values(&self) -> Vec<Value> {
        Vec::new()
    }

    fn from_row(_row: &Row<'_>) -> DbResult<Self> {
        Ok(Self)
    }

    fn apply_patch(&mut self, _patch: &()) {}
}

fn setup() -> Connection {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE payments (
            id TEXT PRIMARY KEY NOT NULL,
            bill_id TEXT NOT NULL REFERENCES bills(id),
            paid_cents INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER
        );",
    )
    .unwrap();
    conn
}

#[test]
fn store_works_for_entities_defined_outside_the_crate() {
    let conn = setup();
    let bills = RecordStore::<Bill>::try_new(&conn).unwrap();
    let payments = RecordStore::<Payment>::try_new(&conn).unwrap();

    let rent = bills.create(Bill::new("Rent", 150_000, 1)).unwrap();
    let payment = payments
        .create(Payment {
            bill_id: rent.id.to_string(),
            paid_cents: 150_000,
        })
        .unwrap();

    let updated = payments
        .update(
            payment.id,
            &PaymentPatch {
                paid_cents: Some(149_000),
            },
        )
        .unwrap();
    assert_eq!(updated.data.paid_cents, 149_000);
    assert_eq!(updated.data.bill_id, rent.id.to_string());

    payments.soft_delete(payment.id).unwrap();
    assert_eq!(payments.count(false).unwrap(), 0);
    payments.restore(payment.id).unwrap();
    assert_eq!(payments.count(false).unwrap(), 1);
}

#[test]
fn foreign_key_violation_is_a_conflict() {
    let conn = setup();
    let payments = RecordStore::<Payment>::try_new(&conn).unwrap();

    let err = payments
        .create(Payment {
            bill_id: "missing-bill".to_string(),
            paid_cents: 100,
        })
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(matches!(err, StoreError::Conflict(_)));
    assert_eq!(payments.count(true).unwrap(), 0);
}

#[test]
fn custom_validation_runs_before_patches_are_written() {
    let conn = setup();
    let bills = RecordStore::<Bill>::try_new(&conn).unwrap();
    let payments = RecordStore::<Payment>::try_new(&conn).unwrap();

    let rent = bills.create(Bill::new("Rent", 150_000, 1)).unwrap();
    let payment = payments
        .create(Payment {
            bill_id: rent.id.to_string(),
            paid_cents: 100,
        })
        .unwrap();

    let err = payments
        .update(payment.id, &PaymentPatch { paid_cents: Some(0) })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(
        payments.find_by_id(payment.id).unwrap().unwrap().data.paid_cents,
        100
    );
}

#[test]
fn business_columns_cannot_shadow_lifecycle_columns() {
    let conn = setup();

    let err = RecordStore::<Shadowing>::try_new(&conn).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Storage);
    assert!(err.to_string().contains("created_at"));
}

#[test]
fn every_isolation_level_commits_writes() {
    let conn = setup();

    for isolation in [
        IsolationLevel::Deferred,
        IsolationLevel::Immediate,
        IsolationLevel::Exclusive,
    ] {
        let options = TransactionOptions::default().with_isolation(isolation);
        let bills = RecordStore::<Bill>::try_with_options(&conn, options).unwrap();
        assert_eq!(bills.options().isolation(), isolation);

        let bill = bills
            .create(Bill::new(format!("Bill {}", isolation.as_str()), 1, 1))
            .unwrap();
        assert!(bills.find_by_id(bill.id).unwrap().is_some());
    }
}
