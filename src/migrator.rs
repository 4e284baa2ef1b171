use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250101_000001_create_municipalities_table::Migration),
            Box::new(m20250101_000002_create_users_table::Migration),
            Box::new(m20250101_000003_create_marketplace_items_table::Migration),
            Box::new(m20250101_000004_create_marketplace_transactions_table::Migration),
        ]
    }
}

#[derive(DeriveIden)]
enum Municipalities {
    Table,
    Id,
    Name,
    Slug,
    PsgcCode,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
    Email,
    DisplayName,
    Role,
    MunicipalityId,
    BarangayId,
    DateOfBirth,
    EmailVerified,
    AdminVerified,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum MarketplaceItems {
    Table,
    Id,
    OwnerId,
    MunicipalityId,
    BarangayId,
    Title,
    Description,
    Category,
    Condition,
    TransactionType,
    Price,
    LendDurationDays,
    SecurityDeposit,
    PickupLocation,
    Status,
    IsActive,
    Images,
    ViewCount,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum MarketplaceTransactions {
    Table,
    Id,
    ItemId,
    BuyerId,
    SellerId,
    TransactionType,
    Amount,
    Status,
    PickupAt,
    PickupLocation,
    BuyerNotes,
    CreatedAt,
    UpdatedAt,
}

mod m20250101_000001_create_municipalities_table {
    use super::Municipalities;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000001_create_municipalities_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Municipalities::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Municipalities::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Municipalities::Name).string().not_null())
                        .col(
                            ColumnDef::new(Municipalities::Slug)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Municipalities::PsgcCode).string().null())
                        .col(
                            ColumnDef::new(Municipalities::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Municipalities::Table).to_owned())
                .await
        }
    }
}

mod m20250101_000002_create_users_table {
    use super::{Municipalities, Users};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000002_create_users_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Users::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Users::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Users::Email)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Users::DisplayName).string().not_null())
                        .col(ColumnDef::new(Users::Role).string_len(32).not_null())
                        .col(ColumnDef::new(Users::MunicipalityId).uuid().null())
                        .col(ColumnDef::new(Users::BarangayId).uuid().null())
                        .col(ColumnDef::new(Users::DateOfBirth).date().null())
                        .col(
                            ColumnDef::new(Users::EmailVerified)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Users::AdminVerified)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Users::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Users::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_users_municipality")
                                .from(Users::Table, Users::MunicipalityId)
                                .to(Municipalities::Table, Municipalities::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_users_municipality_id")
                        .table(Users::Table)
                        .col(Users::MunicipalityId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Users::Table).to_owned())
                .await
        }
    }
}

mod m20250101_000003_create_marketplace_items_table {
    use super::{MarketplaceItems, Municipalities, Users};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000003_create_marketplace_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(MarketplaceItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(MarketplaceItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(MarketplaceItems::OwnerId).uuid().not_null())
                        .col(
                            ColumnDef::new(MarketplaceItems::MunicipalityId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(MarketplaceItems::BarangayId).uuid().null())
                        .col(
                            ColumnDef::new(MarketplaceItems::Title)
                                .string_len(200)
                                .not_null(),
                        )
                        .col(ColumnDef::new(MarketplaceItems::Description).text().not_null())
                        .col(
                            ColumnDef::new(MarketplaceItems::Category)
                                .string_len(50)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MarketplaceItems::Condition)
                                .string_len(10)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MarketplaceItems::TransactionType)
                                .string_len(10)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MarketplaceItems::Price)
                                .decimal_len(12, 2)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(MarketplaceItems::LendDurationDays)
                                .integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(MarketplaceItems::SecurityDeposit)
                                .decimal_len(12, 2)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(MarketplaceItems::PickupLocation)
                                .string_len(200)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(MarketplaceItems::Status)
                                .string_len(20)
                                .not_null()
                                .default("pending"),
                        )
                        .col(
                            ColumnDef::new(MarketplaceItems::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(ColumnDef::new(MarketplaceItems::Images).json().not_null())
                        .col(
                            ColumnDef::new(MarketplaceItems::ViewCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(MarketplaceItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MarketplaceItems::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_marketplace_items_owner")
                                .from(MarketplaceItems::Table, MarketplaceItems::OwnerId)
                                .to(Users::Table, Users::Id),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_marketplace_items_municipality")
                                .from(MarketplaceItems::Table, MarketplaceItems::MunicipalityId)
                                .to(Municipalities::Table, Municipalities::Id),
                        )
                        .to_owned(),
                )
                .await?;

            for (name, col) in [
                ("idx_marketplace_items_owner_id", MarketplaceItems::OwnerId),
                (
                    "idx_marketplace_items_municipality_id",
                    MarketplaceItems::MunicipalityId,
                ),
                ("idx_marketplace_items_status", MarketplaceItems::Status),
                ("idx_marketplace_items_created_at", MarketplaceItems::CreatedAt),
            ] {
                manager
                    .create_index(
                        Index::create()
                            .if_not_exists()
                            .name(name)
                            .table(MarketplaceItems::Table)
                            .col(col)
                            .to_owned(),
                    )
                    .await?;
            }

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(MarketplaceItems::Table).to_owned())
                .await
        }
    }
}

mod m20250101_000004_create_marketplace_transactions_table {
    use super::{MarketplaceItems, MarketplaceTransactions, Users};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    /// One live negotiation per item, enforced by the store itself.
    const LIVE_ITEM_INDEX: &str = "CREATE UNIQUE INDEX IF NOT EXISTS \
        ux_marketplace_transactions_live_item \
        ON marketplace_transactions (item_id) \
        WHERE status IN ('pending', 'awaiting_buyer')";

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000004_create_marketplace_transactions_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(MarketplaceTransactions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(MarketplaceTransactions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MarketplaceTransactions::ItemId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MarketplaceTransactions::BuyerId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MarketplaceTransactions::SellerId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MarketplaceTransactions::TransactionType)
                                .string_len(10)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MarketplaceTransactions::Amount)
                                .decimal_len(12, 2)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(MarketplaceTransactions::Status)
                                .string_len(20)
                                .not_null()
                                .default("pending"),
                        )
                        .col(
                            ColumnDef::new(MarketplaceTransactions::PickupAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(MarketplaceTransactions::PickupLocation)
                                .string_len(200)
                                .null(),
                        )
                        .col(ColumnDef::new(MarketplaceTransactions::BuyerNotes).text().null())
                        .col(
                            ColumnDef::new(MarketplaceTransactions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MarketplaceTransactions::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_marketplace_transactions_item")
                                .from(
                                    MarketplaceTransactions::Table,
                                    MarketplaceTransactions::ItemId,
                                )
                                .to(MarketplaceItems::Table, MarketplaceItems::Id),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_marketplace_transactions_buyer")
                                .from(
                                    MarketplaceTransactions::Table,
                                    MarketplaceTransactions::BuyerId,
                                )
                                .to(Users::Table, Users::Id),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_marketplace_transactions_seller")
                                .from(
                                    MarketplaceTransactions::Table,
                                    MarketplaceTransactions::SellerId,
                                )
                                .to(Users::Table, Users::Id),
                        )
                        .to_owned(),
                )
                .await?;

            for (name, col) in [
                (
                    "idx_marketplace_transactions_buyer_id",
                    MarketplaceTransactions::BuyerId,
                ),
                (
                    "idx_marketplace_transactions_seller_id",
                    MarketplaceTransactions::SellerId,
                ),
                (
                    "idx_marketplace_transactions_item_id",
                    MarketplaceTransactions::ItemId,
                ),
            ] {
                manager
                    .create_index(
                        Index::create()
                            .if_not_exists()
                            .name(name)
                            .table(MarketplaceTransactions::Table)
                            .col(col)
                            .to_owned(),
                    )
                    .await?;
            }

            // Partial indexes are not expressible through the schema builder
            manager
                .get_connection()
                .execute_unprepared(LIVE_ITEM_INDEX)
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(
                    Table::drop()
                        .table(MarketplaceTransactions::Table)
                        .to_owned(),
                )
                .await
        }
    }
}
