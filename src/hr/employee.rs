// 🪪 Employees - the people on the payroll

use super::{EmployeeStatus, EmploymentType};
use crate::db::{atomically, conflict_on_duplicate, record_event, Filter, Page, PageRequest};
use crate::error::{LedgerError, Result};
use crate::money;
use crate::tenancy::TenantContext;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    pub id: i64,
    pub company_id: i64,
    pub user_id: Option<i64>,
    pub employee_code: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub employment_type: EmploymentType,
    pub status: EmployeeStatus,
    pub job_title: String,
    pub department: String,
    pub manager_id: Option<i64>,
    pub hire_date: NaiveDate,
    pub termination_date: Option<NaiveDate>,
    /// Annual.
    pub base_salary: Decimal,
    pub hourly_rate: Option<Decimal>,
    pub health_insurance: bool,
    pub dental_insurance: bool,
    pub retirement_plan: bool,
    pub emergency_contact_name: String,
    pub emergency_contact_phone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Employee {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewEmployee {
    pub user_id: Option<i64>,
    pub employee_code: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    pub employment_type: EmploymentType,
    pub job_title: String,
    #[serde(default)]
    pub department: String,
    pub manager_id: Option<i64>,
    pub hire_date: NaiveDate,
    #[serde(default)]
    pub base_salary: Decimal,
    pub hourly_rate: Option<Decimal>,
    #[serde(default)]
    pub health_insurance: bool,
    #[serde(default)]
    pub dental_insurance: bool,
    #[serde(default)]
    pub retirement_plan: bool,
    #[serde(default)]
    pub emergency_contact_name: String,
    #[serde(default)]
    pub emergency_contact_phone: String,
}

impl NewEmployee {
    fn validate(&self, conn: &Connection, company_id: i64) -> Result<()> {
        if self.employee_code.trim().is_empty() {
            return Err(LedgerError::validation("employee code is required"));
        }
        if self.first_name.trim().is_empty() || self.last_name.trim().is_empty() {
            return Err(LedgerError::validation("first and last name are required"));
        }
        if !self.email.contains('@') {
            return Err(LedgerError::validation(format!("invalid employee email '{}'", self.email)));
        }
        if self.job_title.trim().is_empty() {
            return Err(LedgerError::validation("job title is required"));
        }
        if self.base_salary < Decimal::ZERO || self.hourly_rate.map_or(false, |r| r < Decimal::ZERO) {
            return Err(LedgerError::validation("pay rates cannot be negative"));
        }
        money::ensure_amount("base salary", self.base_salary)?;
        if let Some(rate) = self.hourly_rate {
            money::ensure_amount("hourly rate", rate)?;
        }
        if let Some(manager_id) = self.manager_id {
            get_employee(conn, company_id, manager_id)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmployeeFilter {
    pub status: Option<EmployeeStatus>,
    pub department: Option<String>,
    /// Name, code, email or job title.
    pub search: Option<String>,
}

/// Active head-count and annual base payroll for one department.
#[derive(Debug, Clone, Serialize)]
pub struct DepartmentSummary {
    pub department: String,
    pub headcount: usize,
    pub total_salary: Decimal,
}

const EMPLOYEE_COLUMNS: &str = "id, company_id, user_id, employee_code, first_name, last_name, email, phone,
     employment_type, status, job_title, department, manager_id, hire_date, termination_date,
     base_salary, hourly_rate, health_insurance, dental_insurance, retirement_plan,
     emergency_contact_name, emergency_contact_phone, created_at, updated_at";

fn row_to_employee(row: &Row<'_>) -> rusqlite::Result<Employee> {
    Ok(Employee {
        id: row.get("id")?,
        company_id: row.get("company_id")?,
        user_id: row.get("user_id")?,
        employee_code: row.get("employee_code")?,
        first_name: row.get("first_name")?,
        last_name: row.get("last_name")?,
        email: row.get("email")?,
        phone: row.get("phone")?,
        employment_type: row.get("employment_type")?,
        status: row.get("status")?,
        job_title: row.get("job_title")?,
        department: row.get("department")?,
        manager_id: row.get("manager_id")?,
        hire_date: row.get("hire_date")?,
        termination_date: row.get("termination_date")?,
        base_salary: money::get(row, "base_salary")?,
        hourly_rate: money::get_opt(row, "hourly_rate")?,
        health_insurance: row.get("health_insurance")?,
        dental_insurance: row.get("dental_insurance")?,
        retirement_plan: row.get("retirement_plan")?,
        emergency_contact_name: row.get("emergency_contact_name")?,
        emergency_contact_phone: row.get("emergency_contact_phone")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub fn create_employee(conn: &Connection, ctx: &TenantContext, new: &NewEmployee) -> Result<Employee> {
    ctx.require_approver("adding an employee")?;
    new.validate(conn, ctx.company_id)?;
    let now = Utc::now();

    let id = atomically(conn, |conn| {
        conn.execute(
            "INSERT INTO employees (company_id, user_id, employee_code, first_name, last_name, email, phone,
                                    employment_type, status, job_title, department, manager_id, hire_date,
                                    base_salary, hourly_rate, health_insurance, dental_insurance,
                                    retirement_plan, emergency_contact_name, emergency_contact_phone,
                                    created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18,
                     ?19, ?20, ?21, ?21)",
            params![
                ctx.company_id,
                new.user_id,
                new.employee_code.trim(),
                new.first_name.trim(),
                new.last_name.trim(),
                new.email.trim(),
                new.phone,
                new.employment_type,
                EmployeeStatus::Active,
                new.job_title.trim(),
                new.department.trim(),
                new.manager_id,
                new.hire_date,
                money::to_sql(&new.base_salary),
                money::opt_to_sql(&new.hourly_rate),
                new.health_insurance,
                new.dental_insurance,
                new.retirement_plan,
                new.emergency_contact_name,
                new.emergency_contact_phone,
                now,
            ],
        )
        .map_err(|e| conflict_on_duplicate(e, format!("employee code '{}' already exists", new.employee_code)))?;
        let id = conn.last_insert_rowid();
        record_event(
            conn,
            ctx.company_id,
            &ctx.actor(),
            "employee_created",
            "employee",
            id,
            serde_json::json!({ "employee_code": new.employee_code, "department": new.department }),
        )?;
        Ok(id)
    })?;

    tracing::info!(company_id = ctx.company_id, employee_id = id, "employee created");
    get_employee(conn, ctx.company_id, id)
}

pub fn get_employee(conn: &Connection, company_id: i64, employee_id: i64) -> Result<Employee> {
    conn.query_row(
        &format!("SELECT {} FROM employees WHERE company_id = ?1 AND id = ?2", EMPLOYEE_COLUMNS),
        params![company_id, employee_id],
        row_to_employee,
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("employee", employee_id))
}

pub fn update_employee(conn: &Connection, ctx: &TenantContext, employee_id: i64, update: &NewEmployee) -> Result<Employee> {
    ctx.require_approver("editing an employee")?;
    let employee = get_employee(conn, ctx.company_id, employee_id)?;
    if update.manager_id == Some(employee.id) {
        return Err(LedgerError::validation("an employee cannot be their own manager"));
    }
    update.validate(conn, ctx.company_id)?;

    conn.execute(
        "UPDATE employees SET user_id = ?1, employee_code = ?2, first_name = ?3, last_name = ?4, email = ?5,
                              phone = ?6, employment_type = ?7, job_title = ?8, department = ?9,
                              manager_id = ?10, hire_date = ?11, base_salary = ?12, hourly_rate = ?13,
                              health_insurance = ?14, dental_insurance = ?15, retirement_plan = ?16,
                              emergency_contact_name = ?17, emergency_contact_phone = ?18, updated_at = ?19
         WHERE id = ?20",
        params![
            update.user_id,
            update.employee_code.trim(),
            update.first_name.trim(),
            update.last_name.trim(),
            update.email.trim(),
            update.phone,
            update.employment_type,
            update.job_title.trim(),
            update.department.trim(),
            update.manager_id,
            update.hire_date,
            money::to_sql(&update.base_salary),
            money::opt_to_sql(&update.hourly_rate),
            update.health_insurance,
            update.dental_insurance,
            update.retirement_plan,
            update.emergency_contact_name,
            update.emergency_contact_phone,
            Utc::now(),
            employee.id,
        ],
    )
    .map_err(|e| conflict_on_duplicate(e, format!("employee code '{}' already exists", update.employee_code)))?;

    record_event(conn, ctx.company_id, &ctx.actor(), "employee_updated", "employee", employee.id, serde_json::json!({}))?;
    get_employee(conn, ctx.company_id, employee_id)
}

/// Status change used by terminations and leave approvals.
pub(crate) fn set_status(conn: &Connection, ctx: &TenantContext, employee: &Employee, status: EmployeeStatus) -> Result<()> {
    conn.execute(
        "UPDATE employees SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status, Utc::now(), employee.id],
    )?;
    record_event(
        conn,
        ctx.company_id,
        &ctx.actor(),
        "employee_status_changed",
        "employee",
        employee.id,
        serde_json::json!({ "from": employee.status, "to": status }),
    )
}

pub fn terminate_employee(conn: &Connection, ctx: &TenantContext, employee_id: i64, date: NaiveDate) -> Result<Employee> {
    ctx.require_approver("terminating an employee")?;
    let employee = get_employee(conn, ctx.company_id, employee_id)?;
    if employee.status == EmployeeStatus::Terminated {
        return Err(LedgerError::transition("employee", employee.status, "terminate"));
    }
    if date < employee.hire_date {
        return Err(LedgerError::validation("termination date cannot be before the hire date"));
    }

    atomically(conn, |conn| {
        conn.execute("UPDATE employees SET termination_date = ?1 WHERE id = ?2", params![date, employee.id])?;
        set_status(conn, ctx, &employee, EmployeeStatus::Terminated)
    })?;

    tracing::info!(company_id = ctx.company_id, employee_id, "employee terminated");
    get_employee(conn, ctx.company_id, employee_id)
}

/// Removes the employee with their payroll records and leave requests.
pub fn delete_employee(conn: &Connection, ctx: &TenantContext, employee_id: i64) -> Result<()> {
    ctx.require_finance_role("deleting an employee")?;
    let employee = get_employee(conn, ctx.company_id, employee_id)?;

    atomically(conn, |conn| {
        conn.execute("DELETE FROM employees WHERE id = ?1", params![employee.id])?;
        record_event(
            conn,
            ctx.company_id,
            &ctx.actor(),
            "employee_deleted",
            "employee",
            employee.id,
            serde_json::json!({ "employee_code": employee.employee_code }),
        )
    })
}

pub fn list_employees(conn: &Connection, company_id: i64, filter: &EmployeeFilter, page: PageRequest) -> Result<Page<Employee>> {
    let mut f = Filter::for_company("company_id", company_id);
    f.push_opt("status = ?", filter.status);
    f.push_opt("department = ?", filter.department.clone().filter(|d| !d.trim().is_empty()));
    f.push_search(&["first_name", "last_name", "employee_code", "email", "job_title"], filter.search.as_deref());

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM employees {}", f.where_sql()),
        f.params(),
        |row| row.get(0),
    )?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM employees {} ORDER BY last_name, first_name, id {}",
        EMPLOYEE_COLUMNS,
        f.where_sql(),
        page.sql()
    ))?;
    let employees = stmt
        .query_map(f.params(), row_to_employee)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Page::new(employees, total, page))
}

/// Active employees grouped by department, largest first.
pub fn department_summary(conn: &Connection, company_id: i64) -> Result<Vec<DepartmentSummary>> {
    let mut stmt = conn.prepare(
        "SELECT department, base_salary FROM employees WHERE company_id = ?1 AND status = 'active'",
    )?;
    let rows = stmt
        .query_map(params![company_id], |row| Ok((row.get::<_, String>(0)?, money::get(row, 1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut summaries: Vec<DepartmentSummary> = Vec::new();
    for (department, salary) in rows {
        let department = if department.is_empty() { "Unassigned".to_string() } else { department };
        match summaries.iter_mut().find(|s| s.department == department) {
            Some(summary) => {
                summary.headcount += 1;
                summary.total_salary += salary;
            }
            None => summaries.push(DepartmentSummary { department, headcount: 1, total_salary: salary }),
        }
    }

    summaries.sort_by(|a, b| b.headcount.cmp(&a.headcount).then_with(|| a.department.cmp(&b.department)));
    Ok(summaries)
}

#[cfg(test)]
pub(crate) fn sample_employee(code: &str, department: &str, salary: i64) -> NewEmployee {
    NewEmployee {
        user_id: None,
        employee_code: code.to_string(),
        first_name: "Efua".into(),
        last_name: format!("Owusu-{}", code),
        email: format!("{}@acme.example", code.to_lowercase()),
        phone: String::new(),
        employment_type: EmploymentType::FullTime,
        job_title: "Analyst".into(),
        department: department.to_string(),
        manager_id: None,
        hire_date: NaiveDate::from_ymd_opt(2023, 1, 9).unwrap(),
        base_salary: Decimal::from(salary),
        hourly_rate: None,
        health_insurance: true,
        dental_insurance: false,
        retirement_plan: true,
        emergency_contact_name: String::new(),
        emergency_contact_phone: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::tenancy::fixtures::{admin_context, member_context};
    use crate::tenancy::Role;

    #[test]
    fn test_create_and_manager_rules() {
        let conn = open_in_memory().unwrap();
        let ctx = admin_context(&conn);

        let lead = create_employee(&conn, &ctx, &sample_employee("E-001", "Finance", 60000)).unwrap();
        assert_eq!(lead.status, EmployeeStatus::Active);
        assert_eq!(lead.full_name(), "Efua Owusu-E-001");

        let mut report = sample_employee("E-002", "Finance", 40000);
        report.manager_id = Some(lead.id);
        let report = create_employee(&conn, &ctx, &report).unwrap();
        assert_eq!(report.manager_id, Some(lead.id));

        let mut own_manager = sample_employee("E-002", "Finance", 40000);
        own_manager.manager_id = Some(report.id);
        assert!(matches!(update_employee(&conn, &ctx, report.id, &own_manager), Err(LedgerError::Validation(_))));

        let mut stranger = sample_employee("E-003", "Finance", 1);
        stranger.manager_id = Some(999);
        assert!(matches!(create_employee(&conn, &ctx, &stranger), Err(LedgerError::NotFound(_))));

        assert!(matches!(
            create_employee(&conn, &ctx, &sample_employee("E-001", "Ops", 1)),
            Err(LedgerError::Conflict(_))
        ));

        let staff = member_context(&conn, &ctx, "staff", Role::Employee);
        assert!(matches!(create_employee(&conn, &staff, &sample_employee("E-009", "Ops", 1)), Err(LedgerError::Forbidden(_))));

        println!("✅ Employee creation test passed");
    }

    #[test]
    fn test_terminate_and_department_summary() {
        let conn = open_in_memory().unwrap();
        let ctx = admin_context(&conn);

        create_employee(&conn, &ctx, &sample_employee("E-001", "Finance", 60000)).unwrap();
        create_employee(&conn, &ctx, &sample_employee("E-002", "Finance", 40000)).unwrap();
        create_employee(&conn, &ctx, &sample_employee("E-003", "Sales", 30000)).unwrap();
        let leaving = create_employee(&conn, &ctx, &sample_employee("E-004", "Sales", 35000)).unwrap();

        assert!(terminate_employee(&conn, &ctx, leaving.id, NaiveDate::from_ymd_opt(2022, 1, 1).unwrap()).is_err());
        let gone = terminate_employee(&conn, &ctx, leaving.id, NaiveDate::from_ymd_opt(2025, 6, 30).unwrap()).unwrap();
        assert_eq!(gone.status, EmployeeStatus::Terminated);
        assert!(terminate_employee(&conn, &ctx, leaving.id, NaiveDate::from_ymd_opt(2025, 7, 1).unwrap()).is_err());

        let summary = department_summary(&conn, ctx.company_id).unwrap();
        assert_eq!(summary[0].department, "Finance");
        assert_eq!(summary[0].headcount, 2);
        assert_eq!(summary[0].total_salary, Decimal::from(100000));
        assert_eq!(summary[1].headcount, 1);

        let sales = list_employees(
            &conn,
            ctx.company_id,
            &EmployeeFilter { department: Some("Sales".into()), status: Some(EmployeeStatus::Active), search: None },
            PageRequest::default(),
        )
        .unwrap();
        assert_eq!(sales.total, 1);

        delete_employee(&conn, &ctx, leaving.id).unwrap();
        assert!(get_employee(&conn, ctx.company_id, leaving.id).is_err());
    }
}
