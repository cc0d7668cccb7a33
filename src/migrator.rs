//! Embedded schema migrations. Four logical groups: catalog, orders,
//! fulfillment sessions (with membership, picking and packing rows), and the
//! append-only inventory ledger, plus the minimal return aggregate the
//! cascade compensator purges.

use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240610_000001_create_products::Migration),
            Box::new(m20240610_000002_create_orders::Migration),
            Box::new(m20240610_000003_create_fulfillment_sessions::Migration),
            Box::new(m20240610_000004_create_inventory_movements::Migration),
            Box::new(m20240610_000005_create_return_requests::Migration),
        ]
    }
}

mod m20240610_000001_create_products {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240610_000001_create_products"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Products::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(Products::StoreId).uuid().not_null())
                        .col(ColumnDef::new(Products::Sku).string().not_null())
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(ColumnDef::new(Products::UnitPrice).decimal().not_null())
                        .col(ColumnDef::new(Products::StockOnHand).integer().not_null())
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Products::UpdatedAt).timestamp_with_time_zone())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_products_store_sku")
                        .table(Products::Table)
                        .col(Products::StoreId)
                        .col(Products::Sku)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Products {
        Table,
        Id,
        StoreId,
        Sku,
        Name,
        UnitPrice,
        StockOnHand,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240610_000002_create_orders {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240610_000002_create_orders"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(Orders::StoreId).uuid().not_null())
                        .col(ColumnDef::new(Orders::OrderNumber).string().not_null())
                        .col(ColumnDef::new(Orders::Status).string().not_null())
                        .col(ColumnDef::new(Orders::TotalAmount).decimal().not_null())
                        .col(ColumnDef::new(Orders::ArchivedAt).timestamp_with_time_zone())
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::UpdatedAt).timestamp_with_time_zone())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_orders_store_status")
                        .table(Orders::Table)
                        .col(Orders::StoreId)
                        .col(Orders::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderItems::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::ProductId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                        .col(ColumnDef::new(OrderItems::UnitPrice).decimal().not_null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_items_order")
                                .from(OrderItems::Table, OrderItems::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            // One line per distinct product per order
            manager
                .create_index(
                    Index::create()
                        .name("idx_order_items_order_product")
                        .table(OrderItems::Table)
                        .col(OrderItems::OrderId)
                        .col(OrderItems::ProductId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
        StoreId,
        OrderNumber,
        Status,
        TotalAmount,
        ArchivedAt,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum OrderItems {
        Table,
        Id,
        OrderId,
        ProductId,
        Quantity,
        UnitPrice,
    }
}

mod m20240610_000003_create_fulfillment_sessions {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240610_000003_create_fulfillment_sessions"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(FulfillmentSessions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(FulfillmentSessions::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(FulfillmentSessions::StoreId).uuid().not_null())
                        .col(ColumnDef::new(FulfillmentSessions::Code).string().not_null())
                        .col(
                            ColumnDef::new(FulfillmentSessions::Status)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(FulfillmentSessions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(FulfillmentSessions::UpdatedAt)
                                .timestamp_with_time_zone(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_sessions_store_code")
                        .table(FulfillmentSessions::Table)
                        .col(FulfillmentSessions::StoreId)
                        .col(FulfillmentSessions::Code)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(SessionOrders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(SessionOrders::SessionId).uuid().not_null())
                        .col(ColumnDef::new(SessionOrders::OrderId).uuid().not_null())
                        .primary_key(
                            Index::create()
                                .col(SessionOrders::SessionId)
                                .col(SessionOrders::OrderId),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_session_orders_session")
                                .from(SessionOrders::Table, SessionOrders::SessionId)
                                .to(FulfillmentSessions::Table, FulfillmentSessions::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(PickingItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PickingItems::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(PickingItems::SessionId).uuid().not_null())
                        .col(ColumnDef::new(PickingItems::ProductId).uuid().not_null())
                        .col(
                            ColumnDef::new(PickingItems::RequiredQuantity)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PickingItems::PickedQuantity)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PickingItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PickingItems::UpdatedAt).timestamp_with_time_zone())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_picking_items_session")
                                .from(PickingItems::Table, PickingItems::SessionId)
                                .to(FulfillmentSessions::Table, FulfillmentSessions::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_picking_items_session_product")
                        .table(PickingItems::Table)
                        .col(PickingItems::SessionId)
                        .col(PickingItems::ProductId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(PackingRecords::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PackingRecords::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(PackingRecords::SessionId).uuid().not_null())
                        .col(ColumnDef::new(PackingRecords::OrderId).uuid().not_null())
                        .col(ColumnDef::new(PackingRecords::ProductId).uuid().not_null())
                        .col(ColumnDef::new(PackingRecords::Completed).boolean().not_null())
                        .col(
                            ColumnDef::new(PackingRecords::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PackingRecords::UpdatedAt).timestamp_with_time_zone(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_packing_records_session")
                                .from(PackingRecords::Table, PackingRecords::SessionId)
                                .to(FulfillmentSessions::Table, FulfillmentSessions::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_packing_records_line")
                        .table(PackingRecords::Table)
                        .col(PackingRecords::SessionId)
                        .col(PackingRecords::OrderId)
                        .col(PackingRecords::ProductId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PackingRecords::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(PickingItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(SessionOrders::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(FulfillmentSessions::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum FulfillmentSessions {
        Table,
        Id,
        StoreId,
        Code,
        Status,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum SessionOrders {
        Table,
        SessionId,
        OrderId,
    }

    #[derive(DeriveIden)]
    enum PickingItems {
        Table,
        Id,
        SessionId,
        ProductId,
        RequiredQuantity,
        PickedQuantity,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum PackingRecords {
        Table,
        Id,
        SessionId,
        OrderId,
        ProductId,
        Completed,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240610_000004_create_inventory_movements {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240610_000004_create_inventory_movements"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // order_id is intentionally not a foreign key: ledger rows outlive
            // hard-deleted orders.
            manager
                .create_table(
                    Table::create()
                        .table(InventoryMovements::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryMovements::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(InventoryMovements::ProductId).uuid().not_null())
                        .col(ColumnDef::new(InventoryMovements::OrderId).uuid())
                        .col(
                            ColumnDef::new(InventoryMovements::QuantityDelta)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryMovements::StockBefore)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryMovements::StockAfter)
                                .integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryMovements::Reason).string().not_null())
                        .col(
                            ColumnDef::new(InventoryMovements::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_inventory_movements_product")
                                .from(InventoryMovements::Table, InventoryMovements::ProductId)
                                .to(Products::Table, Products::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_movements_product")
                        .table(InventoryMovements::Table)
                        .col(InventoryMovements::ProductId)
                        .to_owned(),
                )
                .await?;

            // Idempotency key: at most one movement per (order, product, reason)
            manager
                .create_index(
                    Index::create()
                        .name("idx_movements_order_product_reason")
                        .table(InventoryMovements::Table)
                        .col(InventoryMovements::OrderId)
                        .col(InventoryMovements::ProductId)
                        .col(InventoryMovements::Reason)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InventoryMovements::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum InventoryMovements {
        Table,
        Id,
        ProductId,
        OrderId,
        QuantityDelta,
        StockBefore,
        StockAfter,
        Reason,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum Products {
        Table,
        Id,
    }
}

mod m20240610_000005_create_return_requests {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240610_000005_create_return_requests"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ReturnRequests::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ReturnRequests::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(ReturnRequests::StoreId).uuid().not_null())
                        .col(ColumnDef::new(ReturnRequests::OrderId).uuid().not_null())
                        .col(ColumnDef::new(ReturnRequests::Status).string().not_null())
                        .col(ColumnDef::new(ReturnRequests::Reason).string())
                        .col(
                            ColumnDef::new(ReturnRequests::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_return_requests_order")
                        .table(ReturnRequests::Table)
                        .col(ReturnRequests::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ReturnRequests::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum ReturnRequests {
        Table,
        Id,
        StoreId,
        OrderId,
        Status,
        Reason,
        CreatedAt,
    }
}
