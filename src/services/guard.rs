//! Book availability rule
//!
//! A book's `(status, current_borrower_id)` pair is derived from its active
//! loan: loaned to the loan's borrower while one exists, available otherwise.
//! The ledger writes that pair only through [`BookAvailabilityGuard::write`].

use crate::{
    error::{AppError, AppResult},
    models::{Book, BookStatus, Lending, Loan, LoanStatus},
    repository::{sealed::LendingWrite, LoanStore},
};

pub struct BookAvailabilityGuard;

impl BookAvailabilityGuard {
    /// Lending state implied by the book's open loan
    pub fn expected_lending(open_loan: Option<&Loan>) -> Lending {
        match open_loan {
            Some(loan) => match loan.status {
                LoanStatus::Active => Lending::LoanedTo(loan.borrower_id),
                LoanStatus::Requested | LoanStatus::Returned => Lending::Available,
            },
            None => Lending::Available,
        }
    }

    /// Check a book against its open loan
    pub fn verify(book: &Book, open_loan: Option<&Loan>) -> AppResult<()> {
        if !book.lending_is_consistent() {
            return Err(AppError::Internal(format!(
                "Book {} is {} with borrower {:?}",
                book.id, book.status, book.current_borrower_id
            )));
        }

        match Self::expected_lending(open_loan) {
            Lending::LoanedTo(borrower) if book.current_borrower_id != Some(borrower) => {
                Err(AppError::Internal(format!(
                    "Book {} has an active loan to {} but records borrower {:?}",
                    book.id, borrower, book.current_borrower_id
                )))
            }
            // Reserved is allowed here; only `loaned` needs an active loan
            Lending::Available if book.status == BookStatus::Loaned => Err(AppError::Internal(
                format!("Book {} is loaned without an active loan", book.id),
            )),
            _ => Ok(()),
        }
    }

    /// Persist a new lending state and keep the in-memory copy in step
    pub(crate) async fn write<S>(store: &mut S, book: &mut Book, lending: Lending) -> AppResult<()>
    where
        S: LoanStore + ?Sized,
    {
        store.set_lending(book.id, lending, LendingWrite(())).await?;
        book.apply(lending);
        Ok(())
    }
}
