use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;

use crate::error::ServiceResult;
use crate::models::{Category, Dish, Image};

use super::{to_i64, to_u64, DatabaseConnection};

#[derive(Debug, FromRow)]
struct CategoryRow {
    id: i64,
    name: String,
    description: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CategoryRow> for Category {
    fn from(row: CategoryRow) -> Self {
        Self {
            id: to_u64(row.id),
            name: row.name,
            description: row.description,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct DishRow {
    id: i64,
    name: String,
    description: String,
    price: Decimal,
    category_id: i64,
    is_active: bool,
    has_image: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<DishRow> for Dish {
    fn from(row: DishRow) -> Self {
        Self {
            id: to_u64(row.id),
            name: row.name,
            description: row.description,
            price: row.price,
            category_id: to_u64(row.category_id),
            is_active: row.is_active,
            has_image: row.has_image,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const CATEGORY_COLUMNS: &str = "id, name, description, is_active, created_at, updated_at";
const DISH_COLUMNS: &str = "id, name, description, price, category_id, is_active, (image IS NOT NULL) AS has_image, created_at, updated_at";

impl DatabaseConnection {
    pub async fn get_all_categories(&mut self) -> ServiceResult<Vec<Category>> {
        let rows = sqlx::query_as::<_, CategoryRow>(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM category ORDER BY id"
        ))
        .fetch_all(&mut *self.connection)
        .await?;

        Ok(rows.into_iter().map(Category::from).collect())
    }

    pub async fn get_category_by_id(&mut self, id: u64) -> ServiceResult<Option<Category>> {
        let row = sqlx::query_as::<_, CategoryRow>(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM category WHERE id = $1"
        ))
        .bind(to_i64(id))
        .fetch_optional(&mut *self.connection)
        .await?;

        Ok(row.map(Category::from))
    }

    /// Inserts the category if its id is `0`, updates it otherwise.
    pub async fn store_category(&mut self, category: Category) -> ServiceResult<Category> {
        let row = if category.id == 0 {
            sqlx::query_as::<_, CategoryRow>(&format!(
                r#"
                    INSERT INTO category (name, description, is_active)
                    VALUES ($1, $2, $3)
                    RETURNING {CATEGORY_COLUMNS}
                "#
            ))
            .bind(&category.name)
            .bind(&category.description)
            .bind(category.is_active)
            .fetch_one(&mut *self.connection)
            .await?
        } else {
            sqlx::query_as::<_, CategoryRow>(&format!(
                r#"
                    UPDATE category SET name = $2, description = $3, is_active = $4, updated_at = now()
                    WHERE id = $1
                    RETURNING {CATEGORY_COLUMNS}
                "#
            ))
            .bind(to_i64(category.id))
            .bind(&category.name)
            .bind(&category.description)
            .bind(category.is_active)
            .fetch_one(&mut *self.connection)
            .await?
        };

        Ok(row.into())
    }

    pub async fn delete_category(&mut self, id: u64) -> ServiceResult<bool> {
        let result = sqlx::query("DELETE FROM category WHERE id = $1")
            .bind(to_i64(id))
            .execute(&mut *self.connection)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_all_dishes(&mut self) -> ServiceResult<Vec<Dish>> {
        let rows = sqlx::query_as::<_, DishRow>(&format!(
            "SELECT {DISH_COLUMNS} FROM dish ORDER BY id"
        ))
        .fetch_all(&mut *self.connection)
        .await?;

        Ok(rows.into_iter().map(Dish::from).collect())
    }

    pub async fn get_dishes_by_category(&mut self, category_id: u64) -> ServiceResult<Vec<Dish>> {
        let rows = sqlx::query_as::<_, DishRow>(&format!(
            "SELECT {DISH_COLUMNS} FROM dish WHERE category_id = $1 ORDER BY id"
        ))
        .bind(to_i64(category_id))
        .fetch_all(&mut *self.connection)
        .await?;

        Ok(rows.into_iter().map(Dish::from).collect())
    }

    pub async fn get_dish_by_id(&mut self, id: u64) -> ServiceResult<Option<Dish>> {
        let row = sqlx::query_as::<_, DishRow>(&format!(
            "SELECT {DISH_COLUMNS} FROM dish WHERE id = $1"
        ))
        .bind(to_i64(id))
        .fetch_optional(&mut *self.connection)
        .await?;

        Ok(row.map(Dish::from))
    }

    /// Inserts the dish if its id is `0`, updates it otherwise. The image is left untouched.
    pub async fn store_dish(&mut self, dish: Dish) -> ServiceResult<Dish> {
        let row = if dish.id == 0 {
            sqlx::query_as::<_, DishRow>(&format!(
                r#"
                    INSERT INTO dish (name, description, price, category_id, is_active)
                    VALUES ($1, $2, $3, $4, $5)
                    RETURNING {DISH_COLUMNS}
                "#
            ))
            .bind(&dish.name)
            .bind(&dish.description)
            .bind(dish.price)
            .bind(to_i64(dish.category_id))
            .bind(dish.is_active)
            .fetch_one(&mut *self.connection)
            .await?
        } else {
            sqlx::query_as::<_, DishRow>(&format!(
                r#"
                    UPDATE dish SET name = $2, description = $3, price = $4, category_id = $5,
                        is_active = $6, updated_at = now()
                    WHERE id = $1
                    RETURNING {DISH_COLUMNS}
                "#
            ))
            .bind(to_i64(dish.id))
            .bind(&dish.name)
            .bind(&dish.description)
            .bind(dish.price)
            .bind(to_i64(dish.category_id))
            .bind(dish.is_active)
            .fetch_one(&mut *self.connection)
            .await?
        };

        Ok(row.into())
    }

    pub async fn delete_dish(&mut self, id: u64) -> ServiceResult<bool> {
        let result = sqlx::query("DELETE FROM dish WHERE id = $1")
            .bind(to_i64(id))
            .execute(&mut *self.connection)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_dish_image(&mut self, id: u64) -> ServiceResult<Option<Image>> {
        let row = sqlx::query_as::<_, (Option<Vec<u8>>, Option<String>)>(
            "SELECT image, image_mimetype FROM dish WHERE id = $1",
        )
        .bind(to_i64(id))
        .fetch_optional(&mut *self.connection)
        .await?;

        Ok(match row {
            Some((Some(data), Some(mimetype))) => Some(Image { data, mimetype }),
            _ => None,
        })
    }

    pub async fn store_dish_image(&mut self, id: u64, image: Image) -> ServiceResult<bool> {
        let result = sqlx::query(
            "UPDATE dish SET image = $2, image_mimetype = $3, updated_at = now() WHERE id = $1",
        )
        .bind(to_i64(id))
        .bind(image.data)
        .bind(image.mimetype)
        .execute(&mut *self.connection)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_dish_image(&mut self, id: u64) -> ServiceResult<bool> {
        let result = sqlx::query(
            "UPDATE dish SET image = NULL, image_mimetype = NULL, updated_at = now() WHERE id = $1",
        )
        .bind(to_i64(id))
        .execute(&mut *self.connection)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
