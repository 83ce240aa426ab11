//! Content-addressed path asset records.

use sqlx::Row;

use super::Repository;
use crate::errors::AppError;
use crate::models::PathAsset;

impl Repository {
    pub async fn get_path_asset(&self, digest: &str) -> Result<Option<PathAsset>, AppError> {
        let row = sqlx::query(
            "SELECT digest, image_url, path_data, fill_style, created_at, updated_at FROM path_assets WHERE digest = ?"
        )
        .bind(digest)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(path_asset_from_row))
    }

    /// Insert or refresh an asset keyed by digest and return the stored row.
    ///
    /// A concurrent writer for the same digest resolves to a single row; `created_at` keeps the first value.
    pub async fn upsert_path_asset(&self, asset: &PathAsset) -> Result<PathAsset, AppError> {
        sqlx::query(
            r#"
            INSERT INTO path_assets (digest, image_url, path_data, fill_style, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(digest) DO UPDATE SET
                image_url = excluded.image_url,
                path_data = excluded.path_data,
                fill_style = excluded.fill_style,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&asset.digest)
        .bind(&asset.image_url)
        .bind(&asset.path_data)
        .bind(&asset.fill_style)
        .bind(&asset.created_at)
        .bind(&asset.updated_at)
        .execute(&self.pool)
        .await?;

        self.get_path_asset(&asset.digest)
            .await?
            .ok_or_else(|| AppError::Internal(format!("Asset {} vanished after upsert", asset.digest)))
    }

    pub async fn count_path_assets(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM path_assets")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("total"))
    }
}

fn path_asset_from_row(row: &sqlx::sqlite::SqliteRow) -> PathAsset {
    PathAsset {
        digest: row.get("digest"),
        image_url: row.get("image_url"),
        path_data: row.get("path_data"),
        fill_style: row.get("fill_style"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
