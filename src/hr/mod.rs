// 👔 HR - Employees, payroll and leave

pub mod employee;
pub mod leave;
pub mod payroll;

use crate::db::sql_enum;

sql_enum! {
    pub enum EmploymentType {
        FullTime => "full_time",
        PartTime => "part_time",
        Contract => "contract",
        Intern => "intern",
        Temporary => "temporary",
    }
}

sql_enum! {
    pub enum EmployeeStatus {
        Active => "active",
        Inactive => "inactive",
        Terminated => "terminated",
        OnLeave => "on_leave",
    }
}

sql_enum! {
    pub enum PayFrequency {
        Weekly => "weekly",
        BiWeekly => "bi_weekly",
        SemiMonthly => "semi_monthly",
        Monthly => "monthly",
    }
}

impl PayFrequency {
    pub fn periods_per_year(&self) -> u32 {
        match self {
            PayFrequency::Weekly => 52,
            PayFrequency::BiWeekly => 26,
            PayFrequency::SemiMonthly => 24,
            PayFrequency::Monthly => 12,
        }
    }
}

sql_enum! {
    pub enum LeaveType {
        Vacation => "vacation",
        Sick => "sick",
        Personal => "personal",
        Maternity => "maternity",
        Paternity => "paternity",
        Bereavement => "bereavement",
        JuryDuty => "jury_duty",
        Military => "military",
    }
}

sql_enum! {
    pub enum LeaveStatus {
        Pending => "pending",
        Approved => "approved",
        Denied => "denied",
        Cancelled => "cancelled",
    }
}

pub use employee::{DepartmentSummary, Employee, EmployeeFilter, NewEmployee};
pub use leave::{LeaveFilter, LeaveRequest, NewLeaveRequest};
pub use payroll::{NewPayrollPeriod, NewPayrollRecord, PayrollPeriod, PayrollRecord};
