// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tally_app::{
    CustomerFormInput, CustomerType, Gender, InstallmentCount, InstallmentFormInput,
};
use time::{Date, Duration, Month, OffsetDateTime};

const SURNAMES: [&str; 16] = [
    "王", "李", "张", "刘", "陈", "杨", "黄", "赵", "吴", "周", "徐", "孙", "马", "朱", "胡",
    "郭",
];
const GIVEN_NAMES: [&str; 18] = [
    "伟", "芳", "娜", "敏", "静", "丽", "强", "磊", "军", "洋", "勇", "艳", "杰", "娟", "涛",
    "明", "超", "秀英",
];

const CITIES: [&str; 10] = [
    "上海", "北京", "杭州", "南京", "苏州", "成都", "武汉", "深圳", "广州", "西安",
];
const DISTRICTS: [&str; 8] = [
    "朝阳区", "海淀区", "浦东新区", "西湖区", "鼓楼区", "武侯区", "江汉区", "南山区",
];
const STREETS: [&str; 8] = [
    "人民路", "解放路", "中山路", "建设路", "和平街", "长江路", "文化路", "新华街",
];

const OCCUPATIONS: [&str; 10] = [
    "教师", "医生", "工程师", "会计", "设计师", "护士", "销售", "公务员", "自由职业", "学生",
];

const TAGS: [&str; 6] = ["VIP", "新客户", "老客户", "高意向", "待回访", "转介绍"];

const PHONE_PREFIXES: [&str; 8] = ["138", "139", "150", "158", "186", "188", "135", "177"];

const DEPARTMENTS: [&str; 3] = ["销售一部", "销售二部", "销售三部"];
const SIGNING_METHODS: [&str; 2] = ["线上签约", "线下签约"];
const INSTALLMENT_COUNTS: [u8; 5] = [3, 6, 9, 12, 24];

const ORDER_TITLES: [&str; 8] = [
    "首饰套装", "定制项链", "钻石戒指", "手镯", "耳饰", "翡翠吊坠", "对戒", "金条",
];

const NOTE_WORDS: [&str; 16] = [
    "客户", "信用", "良好", "按时", "还款", "需要", "回访", "意向", "强烈", "预算", "充足",
    "已经", "到店", "咨询", "朋友", "推荐",
];

const REFERENCE_YEAR: i32 = 2026;

/// Order placed by a fake customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub title: String,
    pub amount_cents: i64,
    pub ordered_on: Option<Date>,
}

#[derive(Debug, Clone)]
struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    fn new(seed: u64) -> Self {
        let mut state = seed ^ 0x9E37_79B9_7F4A_7C15;
        if state == 0 {
            state = 0xA409_3822_299F_31D0;
        }
        Self { state }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);

        let mut x = self.state;
        x ^= x >> 13;
        x ^= x << 7;
        x ^= x >> 17;
        x
    }

    fn int_n(&mut self, n: usize) -> usize {
        if n <= 1 {
            return 0;
        }
        (self.next_u64() % (n as u64)) as usize
    }

    fn bool(&mut self) -> bool {
        (self.next_u64() & 1) == 1
    }
}

/// Deterministic generator of customers, orders and installment contracts.
#[derive(Debug, Clone)]
pub struct CustomerFaker {
    rng: DeterministicRng,
    seed: u64,
}

impl CustomerFaker {
    pub fn new(seed: u64) -> Self {
        let normalized = if seed == 0 { 1 } else { seed };
        Self {
            rng: DeterministicRng::new(normalized),
            seed: normalized,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn int_n(&mut self, n: usize) -> usize {
        self.rng.int_n(n)
    }

    pub fn name(&mut self) -> String {
        format!("{}{}", self.pick(&SURNAMES), self.pick(&GIVEN_NAMES))
    }

    pub fn phone(&mut self) -> String {
        format!(
            "{}{:08}",
            self.pick(&PHONE_PREFIXES),
            self.int_range_i64(0, 99_999_999)
        )
    }

    /// A filled-in customer form. `sales_staff` may be empty, leaving the
    /// customer unassigned.
    pub fn customer(&mut self, sales_staff: &[&str]) -> CustomerFormInput {
        let name = self.name();
        let customer_type = if self.rng.bool() {
            CustomerType::Installment
        } else {
            CustomerType::Retail
        };
        let contract_name = match customer_type {
            CustomerType::Installment if self.rng.int_n(3) == 0 => self.name(),
            _ => String::new(),
        };
        let assigned_sales = if sales_staff.is_empty() {
            String::new()
        } else {
            self.pick(sales_staff).to_owned()
        };
        let order_date = if self.rng.int_n(4) == 0 {
            None
        } else {
            Some(self.date_in_year(REFERENCE_YEAR))
        };

        CustomerFormInput {
            phone: self.phone(),
            wechat: if self.rng.bool() {
                format!("wx_{}", self.int_range_i64(10_000, 999_999))
            } else {
                String::new()
            },
            address: format!(
                "{}{}{}{}号",
                self.pick(&CITIES),
                self.pick(&DISTRICTS),
                self.pick(&STREETS),
                self.int_range_i64(1, 999)
            ),
            occupation: self.pick(&OCCUPATIONS).to_owned(),
            notes: self.sentence(2, 6),
            contract_name,
            gender: if self.rng.bool() {
                Gender::Female
            } else {
                Gender::Male
            },
            customer_type,
            assigned_sales,
            tags: self.tags(),
            order_date,
            name,
        }
    }

    pub fn order(&mut self) -> Order {
        Order {
            title: self.pick(&ORDER_TITLES).to_owned(),
            amount_cents: self.int_range_i64(50_000, 5_000_000),
            ordered_on: Some(self.date_in_year(REFERENCE_YEAR)),
        }
    }

    /// An installment contract form signed by `contract_name`.
    pub fn installment_form(
        &mut self,
        contract_name: &str,
        sales_person: &str,
    ) -> InstallmentFormInput {
        let count = INSTALLMENT_COUNTS[self.rng.int_n(INSTALLMENT_COUNTS.len())];
        let mut form = InstallmentFormInput::new(contract_name, sales_person);
        form.order_date = Some(self.date_in_year(REFERENCE_YEAR));
        form.department = self.pick(&DEPARTMENTS).to_owned();
        form.is_overdue = self.rng.int_n(4) == 0;
        form.is_in_group = self.rng.bool();
        form.has_e_sign_contract = self.rng.bool();
        form.is_first_payment_manual = self.rng.bool();
        form.signing_method = self.pick(&SIGNING_METHODS).to_owned();
        form.notes = self.sentence(3, 8);
        form.installment_amount_cents = self.int_range_i64(50, 500) * 1_000;
        if let Some(count) = InstallmentCount::new(count) {
            form.set_installment_count(count);
        }
        let day = self.int_range_i64(1, 28);
        form.monthly_payment_date = format!("每月{day}日");
        form
    }

    pub fn date_in_year(&mut self, year: i32) -> Date {
        let Ok(start) = Date::from_calendar_date(year, Month::January, 1) else {
            return Date::MIN;
        };
        start + Duration::days(self.int_range_i64(0, 364))
    }

    pub fn datetime_in_year(&mut self, year: i32) -> OffsetDateTime {
        let date = self.date_in_year(year);
        date.midnight().assume_utc() + Duration::seconds(self.int_range_i64(0, 86_399))
    }

    fn tags(&mut self) -> BTreeSet<String> {
        let count = self.rng.int_n(3);
        (0..count).map(|_| self.pick(&TAGS).to_owned()).collect()
    }

    fn pick<'a>(&mut self, items: &'a [&'a str]) -> &'a str {
        items[self.rng.int_n(items.len())]
    }

    fn int_range_i64(&mut self, min: i64, max: i64) -> i64 {
        if max <= min {
            return min;
        }
        let span = max - min + 1;
        min + (self.rng.next_u64() % (span as u64)) as i64
    }

    fn sentence(&mut self, min_words: usize, max_words: usize) -> String {
        let count = self.int_range_i64(min_words as i64, max_words as i64) as usize;
        let mut sentence = (0..count)
            .map(|_| self.pick(&NOTE_WORDS))
            .collect::<String>();
        sentence.push('。');
        sentence
    }
}

pub fn temp_db_path() -> Result<(tempfile::TempDir, PathBuf)> {
    let dir = tempfile::tempdir().context("create temp dir")?;
    let db_path = dir.path().join("tally.db");
    Ok((dir, db_path))
}

pub fn fixture_datetime() -> &'static str {
    "2026-02-19T12:34:56Z"
}

pub fn tag_catalog() -> &'static [&'static str] {
    &TAGS
}

#[cfg(test)]
mod tests {
    use super::{CustomerFaker, tag_catalog, temp_db_path};
    use std::collections::BTreeSet;
    use tally_app::CustomerType;

    const STAFF: [&str; 2] = ["Alice Chen", "Bob Wang"];

    #[test]
    fn new_deterministic_seed() {
        let mut left = CustomerFaker::new(42);
        let mut right = CustomerFaker::new(42);
        assert_eq!(left.customer(&STAFF), right.customer(&STAFF));
    }

    #[test]
    fn zero_seed_is_normalized() {
        assert_eq!(CustomerFaker::new(0).seed(), 1);
    }

    #[test]
    fn customer_forms_validate() {
        let mut faker = CustomerFaker::new(7);
        for _ in 0..50 {
            let customer = faker.customer(&STAFF);
            customer.validate().expect("generated customer is valid");
            assert_eq!(customer.phone.len(), 11, "phone {}", customer.phone);
            assert!(STAFF.contains(&customer.assigned_sales.as_str()));
            assert!(
                customer
                    .tags
                    .iter()
                    .all(|tag| tag_catalog().contains(&tag.as_str()))
            );
            if customer.customer_type == CustomerType::Retail {
                assert!(customer.contract_name.is_empty());
            }
        }
    }

    #[test]
    fn empty_staff_leaves_customer_unassigned() {
        let mut faker = CustomerFaker::new(9);
        assert!(faker.customer(&[]).assigned_sales.is_empty());
    }

    #[test]
    fn installment_forms_keep_checklist_in_sync() {
        let mut faker = CustomerFaker::new(11);
        for _ in 0..20 {
            let form = faker.installment_form("张小美", "Alice Chen");
            form.validate().expect("generated contract is valid");
            assert_eq!(
                form.payment_status().len(),
                form.installment_count().periods()
            );
            assert!(form.monthly_payment_date.starts_with("每月"));
        }
    }

    #[test]
    fn orders_are_positive_and_dated() {
        let mut faker = CustomerFaker::new(5);
        let order = faker.order();
        assert!(order.amount_cents >= 50_000);
        assert!(order.ordered_on.is_some());
        assert!(!order.title.is_empty());
    }

    #[test]
    fn variety_across_seeds() {
        let names: BTreeSet<String> = (0_u64..20_u64)
            .map(|seed| CustomerFaker::new(seed).name())
            .collect();
        assert!(names.len() >= 10, "got {}", names.len());
    }

    #[test]
    fn temp_db_path_lives_in_temp_dir() -> anyhow::Result<()> {
        let (dir, path) = temp_db_path()?;
        assert!(path.starts_with(dir.path()));
        Ok(())
    }
}
