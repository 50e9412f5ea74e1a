use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};

/// 予約時にお客様が入力する連絡先
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl CustomerInfo {
    pub fn new(name: String, email: Option<String>, phone: Option<String>) -> Self {
        Self { name, email, phone }
    }

    pub fn validate(&self) -> Result<(), CustomerInfoError> {
        if self.name.trim().is_empty() {
            return Err(CustomerInfoError::NameRequired);
        }
        let filled = |v: &Option<String>| v.as_deref().map_or(false, |s| !s.trim().is_empty());
        if !filled(&self.email) && !filled(&self.phone) {
            return Err(CustomerInfoError::ContactRequired);
        }
        Ok(())
    }
}

/// お客様情報のエラー
#[derive(Error, Display, Debug, PartialEq, Eq)]
pub enum CustomerInfoError {
    #[display(fmt = "Customer name is not specified")]
    NameRequired,
    #[display(fmt = "Either email or phone is required")]
    ContactRequired,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_customer_info_validate() {
        let info = CustomerInfo::new("Hanako".to_owned(), None, Some("090-0000-0000".to_owned()));
        assert_eq!(info.validate(), Ok(()));

        let blank = CustomerInfo::new(" ".to_owned(), Some("a@example.com".to_owned()), None);
        assert_eq!(blank.validate(), Err(CustomerInfoError::NameRequired));

        let unreachable = CustomerInfo::new("Taro".to_owned(), Some("".to_owned()), None);
        assert_eq!(unreachable.validate(), Err(CustomerInfoError::ContactRequired));
    }
}
